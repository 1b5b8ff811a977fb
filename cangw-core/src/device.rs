//! The seam between gateway logic and whatever actually owns CAN sockets.
//!
//! A real deployment backs these traits with SocketCAN devices; tests and
//! the `cangw-sim` crate back them with an in-memory bus. Object-safe trait
//! objects stand in for the C API's function-pointer-plus-cookie pattern.

use crate::frame::CanFrame;
use std::fmt;
use std::sync::Arc;

/// Identifies a registration with a delivery subsystem, handed back by
/// `register_rx` and later passed to `unregister_rx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Callback a job installs to receive frames matching its filter. Invoked
/// from whatever thread the delivery subsystem uses to pump its bus; must
/// not block for long.
pub type RxCallback = Arc<dyn Fn(CanFrame) + Send + Sync>;

/// One CAN-capable endpoint: something frames can be sent out on.
pub trait CanDevice: Send + Sync {
    /// Stable index, used in job records and control-plane responses.
    fn index(&self) -> u32;

    fn name(&self) -> &str;

    /// Transmit a frame. `echo` carries the job's `ECHO` flag through to
    /// whatever owns the real socket, unexamined by the gateway itself.
    /// Errors are logged by the caller and counted against the job's
    /// `dropped` counter; they never propagate into dispatch.
    fn send(&self, frame: CanFrame, echo: bool) -> crate::error::Result<()>;
}

impl fmt::Debug for dyn CanDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanDevice")
            .field("index", &self.index())
            .field("name", &self.name())
            .finish()
    }
}

/// Looks devices up by index, the way the control plane resolves a job's
/// `src`/`dst` indices at creation time.
pub trait DeviceRegistry: Send + Sync {
    fn device(&self, index: u32) -> Option<Arc<dyn CanDevice>>;
}

/// Registers and deregisters receive filters on a device. `JobTable` uses
/// this to wire a job's callback to its source device and to tear it down
/// again on removal.
pub trait DeliverySubsystem: Send + Sync {
    fn register_rx(
        &self,
        device_index: u32,
        filter: crate::filter::Filter,
        callback: RxCallback,
    ) -> crate::error::Result<RegistrationId>;

    fn unregister_rx(&self, device_index: u32, registration: RegistrationId);
}
