//! Managed entity state.
//!
//! The daemon registry owns every `device`; the controller owns these
//! wrappers. A [`ManagedBridge`] embeds the plain wrapper and adds the
//! member list and activation flags; a [`BridgeMember`] holds only a
//! device-user relation to its underlying device, never the device itself.

use std::sync::Arc;

use serde_json::Value;

use extdev_bus::PendingRequest;
use extdev_core::{SyncState, UserToken};

use crate::binding::DeviceTypeBinding;
use crate::retry::RetrySlot;
use crate::vlist::{Keyed, VList};

pub(crate) struct ManagedDevice {
    pub name: String,
    pub binding: Arc<DeviceTypeBinding>,
    /// Persisted configuration blob; `Null` until first configured.
    pub config: Value,
    pub slot: RetrySlot,
    pub pending: Option<PendingRequest>,
}

impl ManagedDevice {
    pub fn new(name: impl Into<String>, binding: Arc<DeviceTypeBinding>, config: Value) -> Self {
        Self {
            name: name.into(),
            binding,
            config,
            slot: RetrySlot::new(),
            pending: None,
        }
    }
}

pub(crate) struct ManagedBridge {
    pub dev: ManagedDevice,
    /// The bridge may exist with no members at all.
    pub empty: bool,
    /// Configured member interface names.
    pub ifnames: Vec<String>,
    /// The external handler has acknowledged the bridge's existence.
    pub active: bool,
    /// Keep the bridge present even without members.
    pub force_active: bool,
    pub n_present: usize,
    pub n_failed: usize,
    pub members: VList<BridgeMember>,
}

impl ManagedBridge {
    pub fn new(name: impl Into<String>, binding: Arc<DeviceTypeBinding>) -> Self {
        Self {
            dev: ManagedDevice::new(name, binding, Value::Null),
            empty: false,
            ifnames: Vec::new(),
            active: false,
            force_active: false,
            n_present: 0,
            n_failed: 0,
            members: VList::new(),
        }
    }
}

pub(crate) struct BridgeMember {
    pub name: String,
    pub present: bool,
    /// Added through the hotplug path rather than configuration.
    pub hotplug: bool,
    /// The underlying device is currently claimed through `user`.
    pub claimed: bool,
    pub slot: RetrySlot,
    pub pending: Option<PendingRequest>,
    pub user: Option<UserToken>,
}

impl BridgeMember {
    /// A configured member: waits for its `add` confirmation.
    pub fn configured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: false,
            hotplug: false,
            claimed: false,
            slot: RetrySlot::pending_add(),
            pending: None,
            user: None,
        }
    }

    /// A hotplug member: the handler already knows it, so it is born
    /// synchronized.
    pub fn hotplug(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: false,
            hotplug: true,
            claimed: false,
            slot: RetrySlot::new(),
            pending: None,
            user: None,
        }
    }
}

impl Keyed for BridgeMember {
    fn key(&self) -> &str {
        &self.name
    }

    fn sticky(&self) -> bool {
        self.hotplug
    }
}

/// Tagged wrapper stored in the controller's device map; pattern-matched
/// instead of downcast.
pub(crate) enum Managed {
    Plain(ManagedDevice),
    Bridge(ManagedBridge),
}

impl Managed {
    pub fn dev(&self) -> &ManagedDevice {
        match self {
            Self::Plain(d) => d,
            Self::Bridge(b) => &b.dev,
        }
    }

    pub fn dev_mut(&mut self) -> &mut ManagedDevice {
        match self {
            Self::Plain(d) => d,
            Self::Bridge(b) => &mut b.dev,
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time view of a managed device, for status output and tests.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub name: String,
    pub type_name: String,
    pub sync: SyncState,
    pub attempts: u8,
    pub timer_armed: bool,
    pub bridge: Option<BridgeSnapshot>,
}

#[derive(Debug, Clone)]
pub struct BridgeSnapshot {
    pub empty: bool,
    pub active: bool,
    pub force_active: bool,
    pub n_present: usize,
    pub n_failed: usize,
    pub members: Vec<MemberSnapshot>,
}

#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    pub name: String,
    pub present: bool,
    pub hotplug: bool,
    pub sync: SyncState,
    pub attempts: u8,
    pub timer_armed: bool,
}

impl Managed {
    pub(crate) fn snapshot(&self) -> DeviceSnapshot {
        let dev = self.dev();
        DeviceSnapshot {
            name: dev.name.clone(),
            type_name: dev.binding.name().to_string(),
            sync: dev.slot.state,
            attempts: dev.slot.attempts,
            timer_armed: dev.slot.timer_armed(),
            bridge: match self {
                Self::Plain(_) => None,
                Self::Bridge(br) => Some(BridgeSnapshot {
                    empty: br.empty,
                    active: br.active,
                    force_active: br.force_active,
                    n_present: br.n_present,
                    n_failed: br.n_failed,
                    members: br
                        .members
                        .iter()
                        .map(|m| MemberSnapshot {
                            name: m.name.clone(),
                            present: m.present,
                            hotplug: m.hotplug,
                            sync: m.slot.state,
                            attempts: m.slot.attempts,
                            timer_armed: m.slot.timer_armed(),
                        })
                        .collect(),
                }),
            },
        }
    }
}
