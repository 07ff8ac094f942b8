//! Per-handler subscription lifecycle.
//!
//! Each device-type binding owns one [`Subscription`] to its external
//! handler's bus object. The handler may not be up yet at bind time, and it
//! may disappear and reappear at any point; the subscription tracks the
//! resolved peer id and resubscribes when a matching object-add event
//! arrives. While unsubscribed, every outward operation is refused through
//! [`Subscription::ensure`] so no pending state accumulates during an
//! outage.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use extdev_core::{ControllerError, ControllerResult};

use crate::transport::{BusResult, BusTransport, NotificationSink};

#[derive(Default)]
struct SubState {
    /// Resolved bus id of the peer object; 0 while unknown.
    peer_id: u32,
    subscribed: bool,
}

/// Subscription state for one external handler object.
pub struct Subscription {
    bus: Arc<dyn BusTransport>,
    peer_name: String,
    state: Mutex<SubState>,
}

impl Subscription {
    pub fn new(bus: Arc<dyn BusTransport>, peer_name: impl Into<String>) -> Self {
        Self {
            bus,
            peer_name: peer_name.into(),
            state: Mutex::new(SubState::default()),
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Resolved peer id, 0 while unknown.
    pub fn peer_id(&self) -> u32 {
        self.state.lock().peer_id
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    /// Resolves the peer object and subscribes to it. On failure the
    /// subscription stays down and waits for an object-add event.
    pub async fn establish(&self, sink: Arc<dyn NotificationSink>) -> BusResult<()> {
        let id = match self.bus.lookup_id(&self.peer_name).await {
            Ok(id) => id,
            Err(err) => {
                debug!(peer = %self.peer_name, %err, "peer object not present, waiting for it");
                return Err(err);
            }
        };
        self.bus.subscribe(id, sink).await?;

        let mut state = self.state.lock();
        state.peer_id = id;
        state.subscribed = true;
        info!(peer = %self.peer_name, id, "subscribed to external handler");
        Ok(())
    }

    /// The subscribed peer disappeared: clear the id and re-arm the waiter.
    pub fn handle_peer_removed(&self) {
        let mut state = self.state.lock();
        state.peer_id = 0;
        state.subscribed = false;
        warn!(peer = %self.peer_name, "external handler disappeared, waiting for it to return");
    }

    /// Retries the subscription when an object-add event matches the peer
    /// name exactly. Returns true if a subscription attempt was made.
    pub async fn handle_object_added(
        &self,
        name: &str,
        sink: Arc<dyn NotificationSink>,
    ) -> BusResult<bool> {
        if name != self.peer_name || self.is_subscribed() {
            return Ok(false);
        }
        self.establish(sink).await?;
        Ok(true)
    }

    /// Guard for outward operations: refuses with a not-found-class error
    /// while the handler is offline, mutating nothing.
    pub fn ensure(&self, action: &'static str) -> ControllerResult<u32> {
        let state = self.state.lock();
        if !state.subscribed {
            warn!(peer = %self.peer_name, action, "handler offline, refusing operation");
            return Err(ControllerError::NotSubscribed {
                peer: self.peer_name.clone(),
                action,
            });
        }
        Ok(state.peer_id)
    }
}
