//! Error kinds surfaced by the control plane.
//!
//! The hot path (`dispatch`) never returns an error: frame loss is only ever
//! visible as a `dropped` counter increment on the job record.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("protocol family not supported")]
    ProtocolFamilyNotSupported,

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("out of memory")]
    OutOfMemory,

    #[error("no such device: index {index}")]
    NoSuchDevice { index: u32 },

    #[error("message too small")]
    MessageTooSmall,

    #[error("dump buffer full")]
    DumpBufferFull,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        GatewayError::InvalidArgument {
            reason: reason.into(),
        }
    }
}
