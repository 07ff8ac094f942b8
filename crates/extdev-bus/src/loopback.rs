//! In-process bus transport with scripted replies.
//!
//! Stands in for the daemon's real bus connection in tests and demos:
//! objects are registered by name, per-method replies are scripted from the
//! test body, every invocation is recorded, and notifications, peer removal
//! and object-add events can be injected at will.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::transport::{BusError, BusResult, BusTransport, NotificationSink, ObjectWatcher};

/// One recorded method invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub peer: u32,
    pub method: String,
    pub payload: Value,
}

#[derive(Default)]
struct LoopbackInner {
    objects: HashMap<String, u32>,
    next_id: u32,
    /// Scripted reply per method name; `Err` is a peer status code.
    replies: HashMap<String, Result<Value, i32>>,
    log: Vec<Invocation>,
    sinks: HashMap<u32, Vec<Arc<dyn NotificationSink>>>,
    watchers: Vec<Arc<dyn ObjectWatcher>>,
}

/// See the module docs.
#[derive(Default)]
pub struct LoopbackBus {
    inner: Mutex<LoopbackInner>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers an object and fires object-add events. Returns its id.
    pub fn add_object(&self, name: &str) -> u32 {
        let (id, watchers) = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.objects.insert(name.to_string(), id);
            (id, inner.watchers.clone())
        };
        for watcher in watchers {
            watcher.object_added(name, id);
        }
        id
    }

    /// Unregisters an object and tells its subscribers the peer is gone.
    pub fn remove_object(&self, name: &str) {
        let sinks = {
            let mut inner = self.inner.lock();
            let Some(id) = inner.objects.remove(name) else {
                return;
            };
            inner.sinks.remove(&id).unwrap_or_default()
        };
        for sink in sinks {
            sink.peer_removed();
        }
    }

    /// Scripts the reply for a method. `Err(code)` makes the peer fail the
    /// call with that status. Unscripted methods reply with `{}`.
    pub fn script_reply(&self, method: &str, reply: Result<Value, i32>) {
        self.inner.lock().replies.insert(method.to_string(), reply);
    }

    /// Delivers a notification from the named object to its subscribers.
    /// Returns the first non-zero sink status, 0 otherwise.
    pub fn notify(&self, object: &str, kind: &str, payload: Value) -> i32 {
        let sinks = {
            let inner = self.inner.lock();
            let Some(id) = inner.objects.get(object) else {
                return extdev_core::status::NOT_FOUND;
            };
            inner.sinks.get(id).cloned().unwrap_or_default()
        };
        for sink in sinks {
            let status = sink.notify(kind, payload.clone());
            if status != 0 {
                return status;
            }
        }
        0
    }

    /// Snapshot of all recorded invocations.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.lock().log.clone()
    }

    /// Drains the invocation log.
    pub fn take_invocations(&self) -> Vec<Invocation> {
        std::mem::take(&mut self.inner.lock().log)
    }
}

#[async_trait]
impl BusTransport for LoopbackBus {
    async fn lookup_id(&self, object: &str) -> BusResult<u32> {
        self.inner
            .lock()
            .objects
            .get(object)
            .copied()
            .ok_or_else(|| BusError::ObjectNotFound(object.to_string()))
    }

    async fn invoke(&self, peer: u32, method: &str, payload: Value) -> BusResult<Value> {
        let mut inner = self.inner.lock();
        if !inner.objects.values().any(|id| *id == peer) {
            return Err(BusError::ObjectNotFound(format!("id {peer}")));
        }
        inner.log.push(Invocation {
            peer,
            method: method.to_string(),
            payload,
        });
        match inner.replies.get(method) {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(code)) => Err(BusError::MethodFailed {
                method: method.to_string(),
                code: *code,
            }),
            None => Ok(json!({})),
        }
    }

    async fn subscribe(&self, peer: u32, sink: Arc<dyn NotificationSink>) -> BusResult<()> {
        let mut inner = self.inner.lock();
        if !inner.objects.values().any(|id| *id == peer) {
            return Err(BusError::ObjectNotFound(format!("id {peer}")));
        }
        inner.sinks.entry(peer).or_default().push(sink);
        Ok(())
    }

    fn watch_objects(&self, watcher: Arc<dyn ObjectWatcher>) {
        self.inner.lock().watchers.push(watcher);
    }
}
