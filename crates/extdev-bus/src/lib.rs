//! # extdev Bus
//!
//! Integration with the local request/notification bus the external device
//! handlers live on.
//!
//! The real transport is owned by the host daemon and reached through the
//! [`BusTransport`] capability trait. This crate adds the pieces the
//! controller needs on top of it:
//!
//! - [`Invoker`]: asynchronous method invocation with per-entity
//!   [`PendingRequest`] handles, so cancellation on entity destruction is
//!   O(1).
//! - [`Subscription`]: per-handler subscription lifecycle — peer lookup,
//!   subscribe, peer-loss handling and resubscription on object-add events.
//! - [`loopback::LoopbackBus`]: an in-process transport with scripted
//!   replies for tests and demos.

pub mod invoker;
pub mod loopback;
pub mod subscription;
pub mod transport;

pub use invoker::{Invoker, PendingRequest};
pub use subscription::Subscription;
pub use transport::{
    BusError, BusResult, BusTransport, NotificationSink, ObjectWatcher, SharedBus,
};
