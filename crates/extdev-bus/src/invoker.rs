//! Asynchronous method invocation.
//!
//! Every mutating call to an external handler goes through
//! [`Invoker::invoke_async`]: the request is submitted on a spawned task and
//! the caller gets a [`PendingRequest`] handle back immediately. The handle
//! lives inside the owning entity (managed device or bridge member); when
//! the entity is destroyed, dropping the handle detaches the completion in
//! O(1) and any late reply is discarded.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::transport::{BusError, BusResult, BusTransport};

/// Completion callback for an asynchronous invocation.
pub type CompletionFn = Box<dyn FnOnce(Result<Value, BusError>) + Send + 'static>;

/// Cancellation handle for one in-flight request.
///
/// Dropping the handle cancels the completion delivery; the request itself
/// may still reach the peer, which is required to tolerate duplicates.
#[derive(Debug)]
pub struct PendingRequest {
    token: CancellationToken,
    detached: bool,
}

impl PendingRequest {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Lets the request run to completion without an owner. Used for
    /// invocations whose confirmation creates the owning entity in the
    /// first place (hotplug add).
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.detached {
            self.token.cancel();
        }
    }
}

/// Issues requests against the bus transport.
#[derive(Clone)]
pub struct Invoker {
    bus: Arc<dyn BusTransport>,
}

impl Invoker {
    pub fn new(bus: Arc<dyn BusTransport>) -> Self {
        Self { bus }
    }

    /// Submits a request and returns once the transport has accepted it.
    ///
    /// The completion callback fires later, on the event loop, with the
    /// peer's reply or the transport error. Must be called from within the
    /// runtime.
    pub fn invoke_async(
        &self,
        peer: u32,
        method: &str,
        payload: Value,
        on_complete: CompletionFn,
    ) -> PendingRequest {
        let token = CancellationToken::new();
        let guard = token.clone();
        let bus = Arc::clone(&self.bus);
        let method = method.to_string();

        trace!(peer, method = %method, "submitting async invocation");
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => {
                    trace!(peer, method = %method, "invocation cancelled by owner");
                }
                result = bus.invoke(peer, &method, payload) => {
                    on_complete(result);
                }
            }
        });

        PendingRequest {
            token,
            detached: false,
        }
    }

    /// Invokes a method and waits for the reply. Used for the dump calls,
    /// which project the reply straight into the caller's output.
    pub async fn invoke_sync(&self, peer: u32, method: &str, payload: Value) -> BusResult<Value> {
        self.bus.invoke(peer, method, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn completion_fires_with_the_reply() {
        let bus = LoopbackBus::new();
        let peer = bus.add_object("network.wifi");
        bus.script_reply("create", Ok(json!({"status": "ok"})));

        let invoker = Invoker::new(bus.clone());
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let _pending = invoker.invoke_async(
            peer,
            "create",
            json!({"name": "wl0"}),
            Box::new(move |result| {
                assert!(result.is_ok());
                flag.store(true, Ordering::SeqCst);
            }),
        );

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(bus.invocations().len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_detaches_the_completion() {
        let bus = LoopbackBus::new();
        let peer = bus.add_object("network.wifi");

        let invoker = Invoker::new(bus.clone());
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let pending = invoker.invoke_async(
            peer,
            "create",
            json!({}),
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
        );
        drop(pending);

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!done.load(Ordering::SeqCst));
    }
}
