//! # extdev Controller
//!
//! The proxy controller mediating between a network interface daemon's
//! device abstraction and out-of-process external device handlers.
//!
//! A handler owns the real device implementation and is reached over a
//! local request/notification bus; the controller keeps both sides
//! synchronised across create, reload, free and member add/remove
//! operations despite asynchronous, lossy confirmations:
//!
//! - per-entity sync state machines for devices and bridge members,
//! - bounded re-invocation when a confirmation never arrives,
//! - survival of handler disappearance with resubscription on return,
//! - interlocking of bridge activation with its members' lifecycles,
//! - safe resource release when confirmations are reordered or lost.
//!
//! [`Controller`] is the entry point; one [`DeviceTypeBinding`] is
//! registered per descriptor through [`Controller::add_type`].

pub mod binding;
pub mod controller;
mod dispatch;
pub mod entity;
pub mod project;
pub mod retry;
mod vlist;

pub use binding::{DeviceTypeBinding, SUBSCRIBER_NAME_PREFIX, TypeDescriptor};
pub use controller::Controller;
pub use entity::{BridgeSnapshot, DeviceSnapshot, MemberSnapshot};
pub use project::{NoSystemStats, SystemStats, project};
pub use retry::{MAX_RETRIES, TIMEOUT_MS};
