//! Unified error types for the extdev controller.
//!
//! Operations refused by the controller return a transport-level status code
//! to the caller; successful operations return 0 immediately and confirmation
//! arrives asynchronously. [`ControllerError::status_code`] provides the
//! mapping onto the bus status space.

use thiserror::Error;

/// Transport-level status codes shared with the bus boundary.
///
/// The numeric space mirrors the local bus the external handlers live on,
/// so refused operations can be returned to bus callers unchanged.
pub mod status {
    /// Request accepted / operation succeeded.
    pub const OK: i32 = 0;
    /// Malformed request or notification payload.
    pub const INVALID_ARGUMENT: i32 = 2;
    /// Subject object, device or member does not exist.
    pub const NOT_FOUND: i32 = 4;
    /// No confirmation within the notification timeout.
    pub const TIMEOUT: i32 = 7;
    /// Operation not supported by the target (e.g. hotplug on a non-bridge).
    pub const NOT_SUPPORTED: i32 = 8;
    /// Unclassified failure.
    pub const UNKNOWN: i32 = 9;
    /// The peer is gone or was never reachable.
    pub const CONNECTION_FAILED: i32 = 10;
}

/// Errors surfaced by controller operations.
#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// The external handler is offline; the operation was refused without
    /// touching any state.
    #[error("external handler '{peer}' is not subscribed, refusing {action}")]
    NotSubscribed {
        /// Peer object name of the offline handler.
        peer: String,
        /// The refused action, for the log line.
        action: &'static str,
    },

    /// The transport refused the request submission.
    #[error("invocation of '{method}' failed for device '{device}' (status {code})")]
    Invocation {
        /// Outbound method name.
        method: String,
        /// Subject device.
        device: String,
        /// Transport status code.
        code: i32,
    },

    /// No matching notification arrived within the timeout budget.
    #[error("no confirmation of '{method}' for device '{device}'")]
    Timeout {
        /// Outbound method that went unconfirmed.
        method: String,
        /// Subject device.
        device: String,
    },

    /// Malformed notification or hotplug request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Subject device or member is not known to the registry.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation does not apply to the target device type.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl ControllerError {
    /// Maps the error onto the transport-level status code returned to
    /// bus callers. 0 is never returned from here.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::NotSubscribed { .. } => status::CONNECTION_FAILED,
            Self::Invocation { code, .. } => *code,
            Self::Timeout { .. } => status::TIMEOUT,
            Self::InvalidArgument(_) => status::INVALID_ARGUMENT,
            Self::NotFound(_) => status::NOT_FOUND,
            Self::NotSupported(_) => status::NOT_SUPPORTED,
        }
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;
