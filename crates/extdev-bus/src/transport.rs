//! Bus transport capability and its callback traits.
//!
//! The transport delivers best-effort request/reply and notification
//! traffic; lost confirmations are recovered by the controller's bounded
//! retries, never by the transport itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use extdev_core::status;

/// Errors produced at the transport boundary.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Named object is not registered on the bus.
    #[error("bus object '{0}' not found")]
    ObjectNotFound(String),

    /// The transport refused the request at submission.
    #[error("request rejected by transport (status {0})")]
    Rejected(i32),

    /// The peer processed the request and returned a failure status.
    #[error("method '{method}' failed on peer (status {code})")]
    MethodFailed {
        /// Invoked method name.
        method: String,
        /// Peer-reported status code.
        code: i32,
    },

    /// The bus connection itself went away.
    #[error("bus connection lost")]
    Disconnected,
}

impl BusError {
    /// Maps onto the shared transport status space.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::ObjectNotFound(_) => status::NOT_FOUND,
            Self::Rejected(code) | Self::MethodFailed { code, .. } => *code,
            Self::Disconnected => status::CONNECTION_FAILED,
        }
    }
}

/// Result type for transport operations.
pub type BusResult<T> = Result<T, BusError>;

/// Receiver for notifications from a subscribed peer object.
///
/// `notify` returns a transport status code (0 = accepted) that is reported
/// back to the notifying peer.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: &str, payload: Value) -> i32;

    /// The subscribed peer object disappeared from the bus.
    fn peer_removed(&self);
}

/// Receiver for bus-global object registration events, used to resubscribe
/// when a handler reappears.
pub trait ObjectWatcher: Send + Sync {
    fn object_added(&self, name: &str, id: u32);
}

/// The asynchronous bus transport capability.
///
/// `invoke` resolves when the peer has acknowledged the request with its
/// reply blob; submission refusal and execution failure both surface
/// through the returned [`BusError`].
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Resolves a peer object name to its current bus id.
    async fn lookup_id(&self, object: &str) -> BusResult<u32>;

    /// Invokes a method on a peer object.
    async fn invoke(&self, peer: u32, method: &str, payload: Value) -> BusResult<Value>;

    /// Subscribes the sink to a peer object's notifications.
    async fn subscribe(&self, peer: u32, sink: Arc<dyn NotificationSink>) -> BusResult<()>;

    /// Registers a watcher for object-add events.
    fn watch_objects(&self, watcher: Arc<dyn ObjectWatcher>);
}

/// Shared transport handle.
pub type SharedBus = Arc<dyn BusTransport>;
