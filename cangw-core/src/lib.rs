//! cangw-core: pure routing, modification-pipeline, checksum, and job-table
//! logic for a CAN-to-CAN frame gateway.
//!
//! No sockets, no async runtime — just algorithms and the shared `JobTable`
//! state. `cangw-sim` and `cangwd` supply the `DeviceRegistry` /
//! `DeliverySubsystem` backends this crate dispatches through.

pub mod checksum;
pub mod config;
pub mod control;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod frame;
pub mod job;
pub mod modify;
pub mod table;

pub use control::{
    CreateRequest, DeleteByIdRequest, DeleteRequest, DumpEntry, DumpResponse, Family,
    GatewayControl,
};
pub use device::{CanDevice, DeliverySubsystem, DeviceRegistry, RegistrationId, RxCallback};
pub use error::{GatewayError, Result};
pub use filter::Filter;
pub use frame::CanFrame;
pub use job::{GatewayType, JobFlags, JobRecord, MatchKey, ModSpec};
