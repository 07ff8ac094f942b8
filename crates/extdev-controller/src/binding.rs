//! Device-type bindings.
//!
//! One [`DeviceTypeBinding`] exists per descriptor loaded at startup. It
//! ties the daemon-visible type name to the external handler's bus object
//! and carries the declared schemas. Bindings live until shutdown; only
//! their subscription state changes at runtime.

use std::sync::Arc;

use extdev_bus::{BusTransport, Subscription};
use extdev_core::Schema;

/// Name prefix of the subscriber-side bus object registered per type.
pub const SUBSCRIBER_NAME_PREFIX: &str = "network.device.ubus.";

/// Parsed descriptor contents handed to [`Controller::add_type`].
///
/// [`Controller::add_type`]: crate::Controller::add_type
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// Human-readable device type name.
    pub name: String,
    /// Bus object name of the external handler.
    pub peer_name: String,
    /// Whether devices of this type can bridge other devices.
    pub bridge_capability: bool,
    /// Name prefix for bridge devices of this type (e.g. `"br-"`).
    pub bridge_prefix: Option<String>,
    pub config_schema: Schema,
    /// Absent schema leaves the corresponding dump operation unset.
    pub info_schema: Option<Schema>,
    pub stats_schema: Option<Schema>,
}

/// Runtime binding of one external device type.
pub struct DeviceTypeBinding {
    name: String,
    subscriber_name: String,
    bridge_capability: bool,
    bridge_prefix: Option<String>,
    config_schema: Schema,
    info_schema: Option<Schema>,
    stats_schema: Option<Schema>,
    subscription: Subscription,
}

impl DeviceTypeBinding {
    pub fn new(desc: TypeDescriptor, bus: Arc<dyn BusTransport>) -> Self {
        let subscriber_name = format!("{SUBSCRIBER_NAME_PREFIX}{}", desc.name);
        Self {
            name: desc.name,
            subscriber_name,
            bridge_capability: desc.bridge_capability,
            bridge_prefix: desc.bridge_prefix,
            config_schema: desc.config_schema,
            info_schema: desc.info_schema,
            stats_schema: desc.stats_schema,
            subscription: Subscription::new(bus, desc.peer_name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus name of the subscriber object registered for this type.
    pub fn subscriber_name(&self) -> &str {
        &self.subscriber_name
    }

    pub fn bridge_capability(&self) -> bool {
        self.bridge_capability
    }

    pub fn bridge_prefix(&self) -> Option<&str> {
        self.bridge_prefix.as_deref()
    }

    pub fn config_schema(&self) -> &Schema {
        &self.config_schema
    }

    pub fn info_schema(&self) -> Option<&Schema> {
        self.info_schema.as_ref()
    }

    pub fn stats_schema(&self) -> Option<&Schema> {
        self.stats_schema.as_ref()
    }

    pub fn has_info(&self) -> bool {
        self.info_schema.is_some()
    }

    pub fn has_stats(&self) -> bool {
        self.stats_schema.is_some()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}
