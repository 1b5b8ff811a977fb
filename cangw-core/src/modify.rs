//! The modification pipeline: a small ordered list of field-level operations
//! assembled once at job creation and replayed, unchanged, for every frame
//! the job forwards.
//!
//! Pure transformation on a single mutable frame; stateless per call, never
//! allocates, never fails.

use crate::frame::CanFrame;

/// Which fields a modification slot's operator applies to. Any subset of
/// `ID`, `DLC`, `DATA` (including none, which makes the slot inactive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldMask(pub u8);

impl FieldMask {
    pub const ID: u8 = 0b001;
    pub const DLC: u8 = 0b010;
    pub const DATA: u8 = 0b100;

    pub fn new(bits: u8) -> Self {
        FieldMask(bits & (Self::ID | Self::DLC | Self::DATA))
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOperator {
    And,
    Or,
    Xor,
    Set,
}

/// One configured operator slot: a type mask plus the template frame whose
/// `id`/`dlc`/`data` fields are read wherever the mask selects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModSlot {
    pub mask: FieldMask,
    pub template: CanFrame,
}

impl ModSlot {
    pub fn new(mask: FieldMask, template: CanFrame) -> Self {
        ModSlot { mask, template }
    }

    pub fn inactive() -> Self {
        ModSlot::default()
    }

    pub fn is_active(&self) -> bool {
        !self.mask.is_empty()
    }
}

/// One primitive, already-resolved field operation: the field it touches,
/// which operator, and the template value to combine with the frame's
/// current value. Built once per job from the four `ModSlot`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModOp {
    Id(ModOperator, u32),
    Dlc(ModOperator, u8),
    Data(ModOperator, u64),
}

/// The ordered concatenation of every active slot's field operations, in
/// the fixed order AND -> OR -> XOR -> SET, ID -> DLC -> DATA within a slot.
/// At most 12 operations; empty is valid (pure forwarding).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModProgram(Vec<ModOp>);

impl ModProgram {
    /// Assemble the program from the four operator slots, given in
    /// AND, OR, XOR, SET order.
    pub fn build(and: ModSlot, or: ModSlot, xor: ModSlot, set: ModSlot) -> Self {
        let mut ops = Vec::with_capacity(12);
        for (operator, slot) in [
            (ModOperator::And, and),
            (ModOperator::Or, or),
            (ModOperator::Xor, xor),
            (ModOperator::Set, set),
        ] {
            if !slot.is_active() {
                continue;
            }
            if slot.mask.contains(FieldMask::ID) {
                ops.push(ModOp::Id(operator, slot.template.id));
            }
            if slot.mask.contains(FieldMask::DLC) {
                ops.push(ModOp::Dlc(operator, slot.template.dlc));
            }
            if slot.mask.contains(FieldMask::DATA) {
                ops.push(ModOp::Data(operator, slot.template.data_u64()));
            }
        }
        ModProgram(ops)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Execute the program against `frame`, in order. Never allocates,
    /// never fails.
    pub fn apply(&self, frame: &mut CanFrame) {
        for op in &self.0 {
            match *op {
                ModOp::Id(operator, tmpl) => frame.id = combine(operator, frame.id, tmpl),
                ModOp::Dlc(operator, tmpl) => frame.dlc = combine(operator, frame.dlc, tmpl),
                ModOp::Data(operator, tmpl) => {
                    frame.set_data_u64(combine(operator, frame.data_u64(), tmpl))
                }
            }
        }
    }
}

fn combine<T>(op: ModOperator, current: T, template: T) -> T
where
    T: std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::BitXor<Output = T>,
{
    match op {
        ModOperator::And => current & template,
        ModOperator::Or => current | template,
        ModOperator::Xor => current ^ template,
        ModOperator::Set => template,
    }
}
