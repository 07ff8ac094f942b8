//! # extdev Core
//!
//! Foundation types for the extdev external-device controller.
//!
//! The controller lets a network interface daemon manage devices whose real
//! implementation lives in a separate out-of-process *external device
//! handler*, reachable over a local request/notification bus. This crate
//! carries the pieces shared by every layer:
//!
//! - **Device registry model**: the daemon-side registry interface
//!   ([`DeviceRegistry`]) and an in-memory reference implementation
//!   ([`MemoryRegistry`]), with tagged device handles instead of structural
//!   downcasts.
//! - **Sync state**: the controller's belief about whether a local entity
//!   matches the external handler's view ([`SyncState`]).
//! - **Schemas**: declarative field descriptions for config, info and stats
//!   payloads ([`Schema`], [`FieldKind`]).
//! - **Errors**: the unified [`ControllerError`] with its transport status
//!   code mapping.

pub mod device;
pub mod error;
pub mod schema;
pub mod sync;

pub use device::{
    DeviceChange, DeviceEvent, DeviceKind, DeviceRegistry, DeviceUser, MemoryRegistry, UserToken,
};
pub use error::{ControllerError, ControllerResult, status};
pub use schema::{Field, FieldKind, Schema};
pub use sync::{SyncState, methods};
