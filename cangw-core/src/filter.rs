//! CAN id/mask filter — the predicate a job registers with the delivery
//! subsystem to decide which frames its receive callback ever sees.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Filter {
    pub can_id: u32,
    pub can_mask: u32,
}

impl Filter {
    pub fn new(can_id: u32, can_mask: u32) -> Self {
        Filter { can_id, can_mask }
    }

    /// Match-all filter: every frame passes.
    pub fn any() -> Self {
        Filter::default()
    }

    pub fn matches(&self, frame_id: u32) -> bool {
        (frame_id & self.can_mask) == (self.can_id & self.can_mask)
    }
}
