//! `JobRecord`: everything one installed routing rule needs to dispatch a
//! frame without touching the control plane again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::checksum::{Crc8Checksum, XorChecksum};
use crate::device::RegistrationId;
use crate::error::{GatewayError, Result};
use crate::filter::Filter;
use crate::modify::ModProgram;

/// Which protocol pairing a job implements. Only CAN-to-CAN exists today;
/// the enum exists so the control-plane header format can reject anything
/// else by name instead of by magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayType {
    CanToCan,
}

/// Wire value of `GatewayType::CanToCan` in the create/delete header's
/// `gwtype` field.
pub const GWTYPE_CAN_CAN: u8 = 1;

impl GatewayType {
    /// Parse a header's raw `gwtype` byte, rejecting anything but
    /// `CAN_CAN` with `invalid-argument` per §4.5/§7.
    pub fn parse(raw: u8) -> Result<Self> {
        match raw {
            GWTYPE_CAN_CAN => Ok(GatewayType::CanToCan),
            _ => Err(GatewayError::invalid(format!("unsupported gwtype: {raw}"))),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            GatewayType::CanToCan => GWTYPE_CAN_CAN,
        }
    }
}

bitflags::bitflags! {
    /// Per-job behavior flags, set at creation and immutable afterward.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct JobFlags: u8 {
        /// Preserve the source device's receive timestamp on the forwarded
        /// frame instead of clearing it.
        const SRC_TSTAMP = 0b001;
        /// Passed straight through to the destination device's `send`:
        /// directs the delivery subsystem to make the forwarded frame
        /// observable on the destination's own receive path, the way a
        /// local socket's loopback flag would. The gateway itself does
        /// nothing with this bit beyond forwarding it.
        const ECHO = 0b010;
    }
}

/// Bundled checksum specs for a job; both are independently enable/disable
/// via `CHECKSUM_DISABLED` sentinel on their own `from_idx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModSpec {
    pub program: ModProgram,
    pub xor: Option<XorChecksum>,
    pub crc8: Option<Crc8Checksum>,
}

impl ModSpec {
    pub fn apply(&self, frame: &mut crate::frame::CanFrame) {
        self.program.apply(frame);
        // Checksums only recompute when some modification actually ran —
        // an unmodified forward passes the frame through byte-for-byte.
        if self.program.is_empty() {
            return;
        }
        if let Some(xor) = &self.xor {
            xor.apply(frame);
        }
        if let Some(crc8) = &self.crc8 {
            crc8.apply(frame);
        }
    }
}

// `ModProgram` doesn't derive `Copy` (it owns a `Vec`); give `ModSpec` its
// own `Default` manually instead of deriving through it naively.
impl PartialEq for ModSpec {
    fn eq(&self, other: &Self) -> bool {
        self.program == other.program && self.xor == other.xor && self.crc8 == other.crc8
    }
}
impl Eq for ModSpec {}

/// The receive-side match key a job was created with: source device plus
/// filter. Exposed for `dump` responses and for `remove_first_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MatchKey {
    pub src_index: u32,
    pub filter: Filter,
}

/// One installed routing rule. Built once by `GatewayControl::create`,
/// wrapped in an `Arc`, and shared between the `JobTable`'s snapshot vector
/// and the delivery subsystem's stored callback closure.
#[derive(Debug)]
pub struct JobRecord {
    pub id: u64,
    pub gateway_type: GatewayType,
    pub match_key: MatchKey,
    pub dst_index: u32,
    pub flags: JobFlags,
    pub modifications: ModSpec,
    /// Handed back by `register_rx` once registration completes; read by
    /// `remove` to unregister. A `OnceLock` breaks the otherwise-circular
    /// dependency between "the callback needs an `Arc<JobRecord>`" and "the
    /// record needs the id `register_rx` returns".
    registration: OnceLock<RegistrationId>,
    pub(crate) frame_count: AtomicU64,
    pub(crate) dropped_count: AtomicU64,
}

impl JobRecord {
    pub fn new(
        id: u64,
        gateway_type: GatewayType,
        match_key: MatchKey,
        dst_index: u32,
        flags: JobFlags,
        modifications: ModSpec,
    ) -> Self {
        JobRecord {
            id,
            gateway_type,
            match_key,
            dst_index,
            flags,
            modifications,
            registration: OnceLock::new(),
            frame_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Record the registration id once `register_rx` has succeeded. Called
    /// exactly once per job, right after construction; panics (via
    /// `OnceLock::set`'s `Result` being ignored only in a bug) if called
    /// twice.
    pub fn set_registration(&self, id: RegistrationId) {
        self.registration
            .set(id)
            .expect("registration set exactly once per job");
    }

    pub fn registration(&self) -> Option<RegistrationId> {
        self.registration.get().copied()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_forwarded(&self) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }
}
