//! The CAN frame type and the gateway-origin ownership marker.
//!
//! A frame is treated as an 8-byte word plus a small header for copy
//! purposes; only the low `dlc` bytes of `data` are semantically
//! significant, but the full 8 bytes are always carried and operated on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Maximum classic-CAN payload length.
pub const MAX_DLC: u8 = 8;

/// Process-unique marker written into a frame's "owning socket" slot when the
/// frame was produced (or re-emitted) by this gateway, so a receive callback
/// can recognize and drop an already-routed frame (loop avoidance).
///
/// The high bit is always set; the simulated backend's socket-owner ids
/// count up from zero and never set it, so the two id spaces never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerMark(u64);

const GATEWAY_BIT: u64 = 1 << 63;

impl OwnerMark {
    pub fn socket(id: u64) -> Self {
        OwnerMark(id & !GATEWAY_BIT)
    }

    fn is_gateway(self) -> bool {
        self.0 & GATEWAY_BIT != 0
    }
}

/// The sentinel mark this gateway process stamps onto every frame it emits.
pub fn gateway_owner_mark() -> OwnerMark {
    static MARK: OnceLock<OwnerMark> = OnceLock::new();
    *MARK.get_or_init(|| {
        static SEED: AtomicU64 = AtomicU64::new(0);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_else(|_| SEED.fetch_add(1, Ordering::Relaxed));
        OwnerMark(nanos | GATEWAY_BIT)
    })
}

/// A single CAN frame: identifier, data-length code, and an 8-byte payload.
///
/// `owner` is the loop-avoidance marker (set by the gateway before `send`);
/// `rx_timestamp_ns` is the hardware receive timestamp, cleared by dispatch
/// unless the job carries `SRC_TSTAMP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    pub id: u32,
    pub dlc: u8,
    pub data: [u8; 8],
    pub owner: Option<OwnerMark>,
    pub rx_timestamp_ns: Option<u64>,
}

impl CanFrame {
    /// Build a frame as it would arrive off the wire: no owner mark yet, a
    /// receive timestamp stamped by the (simulated) hardware.
    pub fn received(id: u32, dlc: u8, data: [u8; 8], rx_timestamp_ns: u64) -> Self {
        CanFrame {
            id,
            dlc,
            data,
            owner: None,
            rx_timestamp_ns: Some(rx_timestamp_ns),
        }
    }

    /// Build a modification-slot template frame. Per the "template frame
    /// copy rule", only `id`, `dlc`, and `data` are ever read from a
    /// template — `owner` and `rx_timestamp_ns` are explicitly zeroed rather
    /// than left to whatever the caller happened to pass in, so two
    /// templates with the same logical content always compare equal.
    pub fn template(id: u32, dlc: u8, data: [u8; 8]) -> Self {
        CanFrame {
            id,
            dlc,
            data,
            owner: None,
            rx_timestamp_ns: None,
        }
    }

    /// The 8-byte payload reinterpreted as one big-endian 64-bit word, so
    /// `data[0]` is the most significant byte — this keeps byte-index math
    /// (checksum `from_idx`/`to_idx`) and whole-word math (`DATA` modify
    /// operations) consistent with each other.
    pub fn data_u64(&self) -> u64 {
        u64::from_be_bytes(self.data)
    }

    pub fn set_data_u64(&mut self, value: u64) {
        self.data = value.to_be_bytes();
    }

    /// Mark this frame as gateway-originated and return it, matching the
    /// `OwnerMark` the gateway checks for on the way back in.
    pub fn marked(mut self) -> Self {
        self.owner = Some(gateway_owner_mark());
        self
    }

    pub fn is_gateway_originated(&self) -> bool {
        matches!(self.owner, Some(mark) if mark.is_gateway())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_u64_round_trips() {
        let f = CanFrame::received(1, 8, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88], 0);
        assert_eq!(f.data_u64(), 0x1122334455667788);
        let mut f2 = f;
        f2.set_data_u64(0xAA22334455667788);
        assert_eq!(f2.data[0], 0xAA);
        assert_eq!(f2.data[7], 0x88);
    }

    #[test]
    fn templates_ignore_owner_and_timestamp() {
        let t1 = CanFrame::template(0x123, 2, [0; 8]);
        let t2 = CanFrame::template(0x123, 2, [0; 8]);
        assert_eq!(t1, t2);
    }

    #[test]
    fn gateway_mark_is_recognized() {
        let f = CanFrame::received(1, 0, [0; 8], 0).marked();
        assert!(f.is_gateway_originated());
        let plain = CanFrame::received(1, 0, [0; 8], 0);
        assert!(!plain.is_gateway_originated());
    }

    #[test]
    fn socket_owner_never_collides_with_gateway_mark() {
        let socket = OwnerMark::socket(42);
        assert!(!socket.is_gateway());
    }
}
