//! # extdev
//!
//! A proxy controller that lets a network interface daemon manage devices
//! whose real implementation lives in a separate out-of-process *external
//! device handler*, reachable over a local request/notification bus.
//!
//! The controller tracks a per-entity sync state machine for every managed
//! device and bridge member, drives bounded retries when confirmation
//! notifications are lost, survives handler disappearance (resubscribing
//! when the handler's bus object returns), and interlocks bridge
//! activation with its members' lifecycles.
//!
//! ## Crate layout
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`extdev_core`] | Device registry model, sync state, schemas, errors |
//! | [`extdev_bus`] | Bus transport capability, invoker, subscriptions |
//! | [`extdev_controller`] | The proxy controller itself |
//! | [`extdev_runtime`] | Descriptor loading, logging, assembly |
//!
//! ## Example
//!
//! ```rust,ignore
//! use extdev::bus::loopback::LoopbackBus;
//! use extdev::{DescriptorLoader, MemoryRegistry, Runtime};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     extdev::logging::init();
//!
//!     let bus = LoopbackBus::new();
//!     let registry = MemoryRegistry::new();
//!     let loader = DescriptorLoader::default();
//!     let runtime = Runtime::init(bus, registry, &loader).await?;
//!
//!     let _controller = runtime.controller();
//!     Ok(())
//! }
//! ```

pub use extdev_bus as bus;
pub use extdev_controller as controller;
pub use extdev_runtime as runtime;

pub use extdev_bus::{BusError, BusResult, BusTransport, NotificationSink, ObjectWatcher};
pub use extdev_controller::{
    Controller, DeviceSnapshot, DeviceTypeBinding, SystemStats, TypeDescriptor,
};
pub use extdev_core::{
    ControllerError, ControllerResult, DeviceChange, DeviceKind, DeviceRegistry, MemoryRegistry,
    Schema, SyncState,
};
pub use extdev_runtime::{DescriptorLoader, Runtime};

/// Logging setup, re-exported from the runtime crate.
pub mod logging {
    pub use extdev_runtime::logging::*;
}
