//! `cangw-sim`: an in-memory stand-in for SocketCAN, used by `cangwd`'s
//! `--sim` mode and by anything exercising `cangw-core` without real
//! hardware.
//!
//! `SimBus` owns a fixed set of `SimDevice`s and implements both
//! `DeviceRegistry` (device lookup by index) and `DeliverySubsystem`
//! (filter registration); `inject` plays a frame onto a device as if it had
//! arrived off the wire, fanning it out to every registered callback whose
//! filter accepts it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use cangw_core::device::{CanDevice, DeliverySubsystem, DeviceRegistry, RegistrationId, RxCallback};
use cangw_core::error::Result;
use cangw_core::filter::Filter;
use cangw_core::frame::CanFrame;

/// One simulated CAN interface. Sent frames are appended to an in-memory
/// log (`sent_frames`) rather than going anywhere; a device can be marked
/// `down`, in which case `send` fails the way a closed socket would.
pub struct SimDevice {
    index: u32,
    name: String,
    sent: Mutex<Vec<CanFrame>>,
    /// Parallel to `sent`: whether the corresponding send carried the
    /// `ECHO` flag, so tests can observe that the gateway passed it through.
    echoed: Mutex<Vec<bool>>,
    down: std::sync::atomic::AtomicBool,
}

impl SimDevice {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        SimDevice {
            index,
            name: name.into(),
            sent: Mutex::new(Vec::new()),
            echoed: Mutex::new(Vec::new()),
            down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().clone()
    }

    /// Whether the Nth sent frame (by `sent_frames` order) was sent with
    /// the `ECHO` flag set.
    pub fn echoed_flags(&self) -> Vec<bool> {
        self.echoed.lock().clone()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }
}

impl CanDevice for SimDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, frame: CanFrame, echo: bool) -> Result<()> {
        if self.is_down() {
            log::warn!("sim device {} ({}) is down, dropping send", self.index, self.name);
            return Err(cangw_core::error::GatewayError::NoSuchDevice { index: self.index });
        }
        self.sent.lock().push(frame);
        self.echoed.lock().push(echo);
        Ok(())
    }
}

struct Registration {
    device_index: u32,
    filter: Filter,
    callback: RxCallback,
}

/// The simulated bus: a fixed device set plus the registry of active
/// receive filters, keyed by the registration id handed out at
/// `register_rx` time.
pub struct SimBus {
    devices: HashMap<u32, Arc<SimDevice>>,
    registrations: Mutex<HashMap<u64, Registration>>,
    next_registration_id: AtomicU64,
}

impl SimBus {
    /// Devices are numbered from 1 — index 0 is reserved (unset / DELETE-all
    /// sentinel, see `cangw_core::job`) and must never name a real device.
    pub fn new(device_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let devices = device_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let index = i as u32 + 1;
                (index, Arc::new(SimDevice::new(index, name)))
            })
            .collect();
        SimBus {
            devices,
            registrations: Mutex::new(HashMap::new()),
            next_registration_id: AtomicU64::new(1),
        }
    }

    pub fn device_handle(&self, index: u32) -> Option<Arc<SimDevice>> {
        self.devices.get(&index).cloned()
    }

    /// Deliver `frame` as if it had just arrived on `device_index`: every
    /// registration on that device whose filter matches the frame's id gets
    /// its callback invoked, in registration order.
    pub fn inject(&self, device_index: u32, frame: CanFrame) {
        let registrations = self.registrations.lock();
        for reg in registrations.values() {
            if reg.device_index == device_index && reg.filter.matches(frame.id) {
                (reg.callback)(frame);
            }
        }
    }

    /// Simulate a device disappearing: callers should pair this with
    /// `GatewayControl::on_device_unregister` to cascade job removal, the
    /// same way a real unplug event would.
    pub fn remove_device(&mut self, device_index: u32) {
        self.devices.remove(&device_index);
        self.registrations
            .lock()
            .retain(|_, reg| reg.device_index != device_index);
    }
}

impl DeviceRegistry for SimBus {
    fn device(&self, index: u32) -> Option<Arc<dyn CanDevice>> {
        self.devices
            .get(&index)
            .map(|d| d.clone() as Arc<dyn CanDevice>)
    }
}

impl DeliverySubsystem for SimBus {
    fn register_rx(
        &self,
        device_index: u32,
        filter: Filter,
        callback: RxCallback,
    ) -> Result<RegistrationId> {
        let id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.lock().insert(
            id,
            Registration {
                device_index,
                filter,
                callback,
            },
        );
        Ok(RegistrationId(id))
    }

    fn unregister_rx(&self, _device_index: u32, registration: RegistrationId) {
        self.registrations.lock().remove(&registration.0);
    }
}
