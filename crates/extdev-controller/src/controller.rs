//! The proxy controller.
//!
//! Mediates between the daemon's device abstraction and the out-of-process
//! external device handlers: daemon-level operations (create, reload, free,
//! set-state, hotplug) enter here, update local state, go out to the handler
//! as asynchronous invocations, and are confirmed later by notifications
//! routed through [`dispatch`](crate::dispatch).
//!
//! All state mutation is serialised through a single lock and no await
//! point is crossed while it is held, preserving the event-loop discipline
//! the protocol was designed for. Timer and completion callbacks re-enter
//! through cloned controller handles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use extdev_bus::{BusTransport, Invoker, NotificationSink, ObjectWatcher, PendingRequest};
use extdev_core::{
    ControllerError, ControllerResult, DeviceChange, DeviceEvent, DeviceKind, DeviceRegistry,
    DeviceUser, Schema, SyncState, methods,
};

use crate::binding::{DeviceTypeBinding, TypeDescriptor};
use crate::entity::{BridgeMember, DeviceSnapshot, Managed, ManagedBridge, ManagedDevice};
use crate::project::{NoSystemStats, SystemStats, project};
use crate::retry::{EntityKey, MAX_RETRIES, TIMEOUT_MS, TickAction, arm_timer};
use crate::vlist::InsertOutcome;

#[derive(Default)]
pub(crate) struct State {
    pub bindings: HashMap<String, Arc<DeviceTypeBinding>>,
    pub devices: HashMap<String, Managed>,
}

pub(crate) struct Shared {
    pub registry: Arc<dyn DeviceRegistry>,
    pub stats: Arc<dyn SystemStats>,
    pub invoker: Invoker,
    pub bus: Arc<dyn BusTransport>,
    pub state: Mutex<State>,
}

/// Handle to the proxy controller. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Controller {
    pub(crate) inner: Arc<Shared>,
}

impl Controller {
    pub fn new(bus: Arc<dyn BusTransport>, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self::with_system_stats(bus, registry, Arc::new(NoSystemStats))
    }

    /// Builds a controller with a system statistics provider for
    /// `dump_info` output.
    pub fn with_system_stats(
        bus: Arc<dyn BusTransport>,
        registry: Arc<dyn DeviceRegistry>,
        stats: Arc<dyn SystemStats>,
    ) -> Self {
        let controller = Self {
            inner: Arc::new(Shared {
                registry,
                stats,
                invoker: Invoker::new(Arc::clone(&bus)),
                bus: Arc::clone(&bus),
                state: Mutex::new(State::default()),
            }),
        };
        bus.watch_objects(Arc::new(ControllerWatcher {
            controller: controller.clone(),
        }));
        controller
    }

    // =========================================================================
    // Type registry glue
    // =========================================================================

    /// Registers a device type from a loaded descriptor and attempts the
    /// handler subscription. A handler that is not up yet leaves the
    /// binding waiting for its object-add event.
    pub async fn add_type(&self, desc: TypeDescriptor) -> ControllerResult<Arc<DeviceTypeBinding>> {
        let binding = Arc::new(DeviceTypeBinding::new(desc, Arc::clone(&self.inner.bus)));
        {
            let mut state = self.inner.state.lock();
            if state.bindings.contains_key(binding.name()) {
                return Err(ControllerError::InvalidArgument(format!(
                    "device type '{}' already registered",
                    binding.name()
                )));
            }
            state
                .bindings
                .insert(binding.name().to_string(), Arc::clone(&binding));
        }
        info!(
            ty = %binding.name(),
            subscriber = %binding.subscriber_name(),
            peer = %binding.subscription().peer_name(),
            bridge = binding.bridge_capability(),
            "registered external device type"
        );

        let sink = self.sink_for(binding.name());
        if binding.subscription().establish(sink).await.is_err() {
            debug!(ty = %binding.name(), "external handler not up yet, subscription deferred");
        }
        Ok(binding)
    }

    pub fn binding(&self, type_name: &str) -> Option<Arc<DeviceTypeBinding>> {
        self.inner.state.lock().bindings.get(type_name).cloned()
    }

    pub(crate) fn sink_for(&self, type_name: &str) -> Arc<dyn NotificationSink> {
        Arc::new(BindingSink {
            controller: self.clone(),
            type_name: type_name.to_string(),
        })
    }

    // =========================================================================
    // Daemon-facing device operations
    // =========================================================================

    /// Creates a device of a registered external type.
    ///
    /// Bridges are constructed locally and their handler-side `create` is
    /// deferred until the first member comes up (or `config_init` for empty
    /// bridges). Plain devices go out to the handler immediately.
    pub fn create_device(&self, type_name: &str, name: &str, config: Value) -> ControllerResult<()> {
        let mut state = self.inner.state.lock();
        let binding = state
            .bindings
            .get(type_name)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("device type '{type_name}'")))?;
        if state.devices.contains_key(name) {
            return Err(ControllerError::InvalidArgument(format!(
                "device '{name}' already exists"
            )));
        }

        if binding.bridge_capability() {
            let mut br = ManagedBridge::new(name, binding);
            self.bridge_apply_config(&mut br, config)?;
            self.inner.registry.insert(name, DeviceKind::ExternalBridge);
            state.devices.insert(name.to_string(), Managed::Bridge(br));
        } else {
            let peer = binding.subscription().ensure(methods::CREATE)?;
            self.inner.registry.insert(name, DeviceKind::External);
            let mut dev = ManagedDevice::new(name, binding, config.clone());
            dev.pending = Some(self.submit(peer, methods::CREATE, config, name));
            let timer = arm_timer(self, EntityKey::Device(name.to_string()), TIMEOUT_MS);
            dev.slot.begin(SyncState::PendingCreate, timer);
            state.devices.insert(name.to_string(), Managed::Plain(dev));
        }
        debug!(device = %name, ty = %type_name, "created device wrapper");
        Ok(())
    }

    /// Applies the initial configuration: plain devices become present,
    /// bridges build their member list and, when empty, go out for
    /// creation right away.
    pub fn config_init(&self, name: &str) -> ControllerResult<()> {
        let mut state = self.inner.state.lock();
        let managed = state
            .devices
            .get_mut(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;
        match managed {
            Managed::Plain(dev) => {
                // deferred while the create confirmation is outstanding;
                // the confirmation itself sets the device present
                if dev.slot.state == SyncState::Synchronized {
                    self.inner.registry.set_present(name, true);
                }
                Ok(())
            }
            Managed::Bridge(br) => self.bridge_config_init(br),
        }
    }

    /// Reloads a device configuration. Returns how the change classifies.
    pub fn reload(&self, name: &str, config: Value) -> ControllerResult<DeviceChange> {
        let mut state = self.inner.state.lock();
        let managed = state
            .devices
            .get_mut(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;
        match managed {
            Managed::Bridge(br) => self.bridge_apply_config(br, config),
            Managed::Plain(dev) => {
                if dev.config == config {
                    return Ok(DeviceChange::None);
                }
                if dev.slot.state.is_pending() {
                    return Err(ControllerError::InvalidArgument(format!(
                        "device '{name}' has an operation outstanding"
                    )));
                }
                let peer = dev.binding.subscription().ensure(methods::RELOAD)?;
                dev.config = config.clone();
                dev.pending = Some(self.submit(peer, methods::RELOAD, config, name));
                let timer = arm_timer(self, EntityKey::Device(name.to_string()), TIMEOUT_MS);
                dev.slot.begin(SyncState::PendingReload, timer);
                Ok(DeviceChange::Applied)
            }
        }
    }

    /// Tears the device down at the handler. The wrapper is removed when
    /// the `free` confirmation arrives.
    pub fn free_device(&self, name: &str) -> ControllerResult<()> {
        let mut state = self.inner.state.lock();
        let managed = state
            .devices
            .get_mut(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;
        let peer = managed.dev().binding.subscription().ensure(methods::FREE)?;
        if let Managed::Bridge(br) = &mut *managed {
            br.active = false;
        }
        let dev = managed.dev_mut();
        dev.pending = Some(self.submit(peer, methods::FREE, json!({ "name": name }), name));
        let timer = arm_timer(self, EntityKey::Device(name.to_string()), TIMEOUT_MS);
        dev.slot.begin(SyncState::PendingFree, timer);
        Ok(())
    }

    /// Brings a bridge up or down. Plain external devices have no
    /// daemon-driven state transitions.
    pub fn set_state(&self, name: &str, up: bool) -> ControllerResult<()> {
        let mut state = self.inner.state.lock();
        let managed = state
            .devices
            .get_mut(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;
        match managed {
            Managed::Plain(_) => Err(ControllerError::NotSupported(format!(
                "device '{name}' is not a bridge"
            ))),
            Managed::Bridge(br) => {
                if up {
                    self.bridge_set_up(br)
                } else {
                    self.bridge_set_down(br)
                }
            }
        }
    }

    // =========================================================================
    // Hotplug protocol
    // =========================================================================

    /// Splices an arbitrary device into a bridge. The member slot is
    /// created by the matching `add` notification; until it arrives the
    /// registry is held so the member's simple device is not swept.
    pub fn hotplug_add(&self, bridge: &str, member: &str) -> ControllerResult<()> {
        let state = self.inner.state.lock();
        let managed = state
            .devices
            .get(bridge)
            .ok_or_else(|| ControllerError::NotFound(bridge.to_string()))?;
        let binding = &managed.dev().binding;
        if !binding.bridge_capability() {
            return Err(ControllerError::NotSupported(format!(
                "device '{bridge}' cannot bridge"
            )));
        }
        let peer = binding.subscription().ensure(methods::ADD)?;

        self.inner.registry.ensure_simple(member);
        let payload = json!({ "bridge": bridge, "member": member });
        self.submit(peer, methods::ADD, payload, member).detach();
        self.inner.registry.lock();
        debug!(bridge = %bridge, member = %member, "hotplug add submitted");
        Ok(())
    }

    /// Removes a hotplugged or configured member from a bridge.
    pub fn hotplug_remove(&self, bridge: &str, member: &str) -> ControllerResult<()> {
        let mut state = self.inner.state.lock();
        let managed = state
            .devices
            .get_mut(bridge)
            .ok_or_else(|| ControllerError::NotFound(bridge.to_string()))?;
        if !managed.dev().binding.bridge_capability() {
            return Err(ControllerError::NotSupported(format!(
                "device '{bridge}' cannot bridge"
            )));
        }
        let Managed::Bridge(br) = managed else {
            return Err(ControllerError::NotSupported(format!(
                "device '{bridge}' is not a bridge"
            )));
        };
        let removed = br
            .members
            .remove(member)
            .ok_or_else(|| ControllerError::NotFound(format!("member '{member}'")))?;
        self.free_member(br, removed);
        Ok(())
    }

    /// Prepares a bridge for accepting a member: asks the handler to bring
    /// it up, then forces it present on confirmation.
    pub fn hotplug_prepare(&self, bridge: &str) -> ControllerResult<()> {
        let mut state = self.inner.state.lock();
        let managed = state
            .devices
            .get_mut(bridge)
            .ok_or_else(|| ControllerError::NotFound(bridge.to_string()))?;
        if !managed.dev().binding.bridge_capability() {
            return Err(ControllerError::NotSupported(format!(
                "device '{bridge}' cannot bridge"
            )));
        }
        let Managed::Bridge(br) = managed else {
            return Err(ControllerError::NotSupported(format!(
                "device '{bridge}' is not a bridge"
            )));
        };
        if br.dev.slot.state.is_pending() {
            return Err(ControllerError::InvalidArgument(format!(
                "bridge '{bridge}' has an operation outstanding"
            )));
        }
        let peer = br.dev.binding.subscription().ensure(methods::PREPARE)?;
        br.dev.pending = Some(self.submit(
            peer,
            methods::PREPARE,
            json!({ "bridge": bridge }),
            bridge,
        ));
        let timer = arm_timer(self, EntityKey::Device(bridge.to_string()), TIMEOUT_MS);
        br.dev.slot.begin(SyncState::PendingPrepare, timer);
        Ok(())
    }

    // =========================================================================
    // Dump operations
    // =========================================================================

    /// Queries the handler for device info and projects the reply through
    /// the declared schema; system-level statistics are appended after the
    /// projection.
    pub async fn dump_info(&self, name: &str) -> ControllerResult<Value> {
        let (peer, schema) = self.dump_target(name, methods::DUMP_INFO)?;
        let reply = self
            .inner
            .invoker
            .invoke_sync(peer, methods::DUMP_INFO, json!({ "name": name }))
            .await
            .map_err(|err| ControllerError::Invocation {
                method: methods::DUMP_INFO.to_string(),
                device: name.to_string(),
                code: err.status_code(),
            })?;
        let mut out = project(&schema, &reply);
        self.inner.stats.append(name, &mut out);
        Ok(Value::Object(out))
    }

    /// Queries the handler for device statistics, projected per schema.
    pub async fn dump_stats(&self, name: &str) -> ControllerResult<Value> {
        let (peer, schema) = self.dump_target(name, methods::DUMP_STATS)?;
        let reply = self
            .inner
            .invoker
            .invoke_sync(peer, methods::DUMP_STATS, json!({ "name": name }))
            .await
            .map_err(|err| ControllerError::Invocation {
                method: methods::DUMP_STATS.to_string(),
                device: name.to_string(),
                code: err.status_code(),
            })?;
        Ok(Value::Object(project(&schema, &reply)))
    }

    fn dump_target(&self, name: &str, method: &'static str) -> ControllerResult<(u32, Schema)> {
        let state = self.inner.state.lock();
        let managed = state
            .devices
            .get(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;
        let binding = &managed.dev().binding;
        let schema = if method == methods::DUMP_INFO {
            binding.info_schema()
        } else {
            binding.stats_schema()
        };
        let schema = schema.cloned().ok_or_else(|| {
            ControllerError::NotSupported(format!(
                "type '{}' declares no {method} schema",
                binding.name()
            ))
        })?;
        let peer = binding.subscription().ensure(method)?;
        Ok((peer, schema))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn snapshot(&self, name: &str) -> Option<DeviceSnapshot> {
        self.inner.state.lock().devices.get(name).map(Managed::snapshot)
    }

    pub fn has_device(&self, name: &str) -> bool {
        self.inner.state.lock().devices.contains_key(name)
    }

    // =========================================================================
    // Bridge control (internal, called with the state lock held)
    // =========================================================================

    fn bridge_config_init(&self, br: &mut ManagedBridge) -> ControllerResult<()> {
        if br.empty {
            br.force_active = true;
            self.inner.registry.set_present(&br.dev.name, true);
        }
        br.n_failed = 0;
        br.members.begin_update();
        for ifname in br.ifnames.clone() {
            self.bridge_add_member(br, &ifname);
        }
        for member in br.members.flush() {
            self.free_member(br, member);
        }
        if br.empty {
            // nothing will bring an empty bridge up later, create it now
            self.bridge_enable_interface(br)?;
        }
        Ok(())
    }

    /// Parses and stores a bridge configuration. The first configuration
    /// is only stored; later ones are diffed against the config schema and
    /// pushed to the handler as a `reload`.
    fn bridge_apply_config(
        &self,
        br: &mut ManagedBridge,
        config: Value,
    ) -> ControllerResult<DeviceChange> {
        let empty = config
            .get("empty")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        // interface names are ignored when the empty flag is set
        let ifnames: Vec<String> = if empty {
            Vec::new()
        } else {
            config
                .get("ifname")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        if br.dev.config.is_null() {
            br.empty = empty;
            br.ifnames = ifnames;
            br.dev.config = config;
            return Ok(DeviceChange::Applied);
        }

        if br.dev.slot.state.is_pending() {
            return Err(ControllerError::InvalidArgument(format!(
                "device '{}' has an operation outstanding",
                br.dev.name
            )));
        }
        let peer = br.dev.binding.subscription().ensure(methods::RELOAD)?;

        let change = if Self::bridge_config_differs(br, &config, empty, &ifnames) {
            DeviceChange::Restart
        } else {
            DeviceChange::Applied
        };
        br.empty = empty;
        br.ifnames = ifnames;
        br.dev.config = config.clone();
        br.dev.pending = Some(self.submit(peer, methods::RELOAD, config, &br.dev.name));
        let timer = arm_timer(self, EntityKey::Device(br.dev.name.clone()), TIMEOUT_MS);
        br.dev.slot.begin(SyncState::PendingReload, timer);
        Ok(change)
    }

    fn bridge_config_differs(
        br: &ManagedBridge,
        new: &Value,
        empty: bool,
        ifnames: &[String],
    ) -> bool {
        if br.empty != empty || br.ifnames != ifnames {
            return true;
        }
        br.dev
            .binding
            .config_schema()
            .fields()
            .iter()
            .any(|f| br.dev.config.get(&f.name) != new.get(&f.name))
    }

    /// Asks the handler to create the bridge. A no-op while the bridge is
    /// active or the create is already outstanding.
    pub(crate) fn bridge_enable_interface(&self, br: &mut ManagedBridge) -> ControllerResult<()> {
        if br.active || br.dev.slot.state == SyncState::PendingCreate {
            return Ok(());
        }
        let peer = br.dev.binding.subscription().ensure(methods::CREATE)?;
        br.dev.pending = Some(self.submit(
            peer,
            methods::CREATE,
            br.dev.config.clone(),
            &br.dev.name,
        ));
        let timer = arm_timer(self, EntityKey::Device(br.dev.name.clone()), TIMEOUT_MS);
        br.dev.slot.begin(SyncState::PendingCreate, timer);
        Ok(())
    }

    fn bridge_disable_interface(&self, br: &mut ManagedBridge) -> ControllerResult<()> {
        if !br.active || br.dev.slot.state == SyncState::PendingDisable {
            return Ok(());
        }
        let peer = br.dev.binding.subscription().ensure(methods::FREE)?;
        br.active = false;
        br.dev.pending = Some(self.submit(
            peer,
            methods::FREE,
            json!({ "name": br.dev.name }),
            &br.dev.name,
        ));
        let timer = arm_timer(self, EntityKey::Device(br.dev.name.clone()), TIMEOUT_MS);
        br.dev.slot.begin(SyncState::PendingDisable, timer);
        Ok(())
    }

    fn bridge_set_up(&self, br: &mut ManagedBridge) -> ControllerResult<()> {
        if br.n_present == 0 && !br.force_active {
            return Err(ControllerError::NotFound(format!(
                "bridge '{}' has no present members",
                br.dev.name
            )));
        }
        br.n_failed = 0;
        for name in br.members.keys() {
            self.bridge_enable_member(br, &name);
        }
        if !br.force_active && br.n_present == 0 {
            // every member bring-up failed
            let _ = self.bridge_disable_interface(br);
            self.inner.registry.set_present(&br.dev.name, false);
            return Err(ControllerError::NotFound(format!(
                "no member of bridge '{}' could be enabled",
                br.dev.name
            )));
        }
        Ok(())
    }

    pub(crate) fn bridge_set_down(&self, br: &mut ManagedBridge) -> ControllerResult<()> {
        // preserved daemon-side state path
        self.inner.registry.set_link_state(&br.dev.name, false);
        for name in br.members.keys() {
            self.bridge_disable_member(br, &name);
        }
        self.bridge_disable_interface(br)
    }

    /// Attaches one member at the handler. Preconditions: the member's
    /// underlying device is present and the bridge is created; if it is
    /// not, the bridge create is triggered instead and the member is
    /// picked up again by the enable pass on its confirmation.
    pub(crate) fn bridge_enable_member(&self, br: &mut ManagedBridge, name: &str) {
        let Some(member) = br.members.get(name) else {
            return;
        };
        if !member.present {
            return;
        }
        let hotplug = member.hotplug;
        let token = member.user;

        if !br.active {
            if let Err(err) = self.bridge_enable_interface(br) {
                debug!(bridge = %br.dev.name, member = %name, %err, "bridge create refused");
            }
            Self::member_mark_failed(br, name);
            return;
        }

        let claimed = token.is_some_and(|t| self.inner.registry.claim(t).is_ok());
        if !claimed {
            warn!(bridge = %br.dev.name, member = %name, "claiming member device failed");
            Self::member_mark_failed(br, name);
            return;
        }

        self.inner.registry.set_present(&br.dev.name, true);

        if hotplug {
            // already attached from the handler's point of view
            if let Some(m) = br.members.get_mut(name) {
                m.claimed = true;
            }
            return;
        }

        match br.dev.binding.subscription().ensure(methods::ADD) {
            Ok(peer) => {
                let payload = json!({ "bridge": br.dev.name, "member": name });
                let pending = self.submit(peer, methods::ADD, payload, name);
                let timer = arm_timer(
                    self,
                    EntityKey::Member {
                        bridge: br.dev.name.clone(),
                        member: name.to_string(),
                    },
                    TIMEOUT_MS,
                );
                if let Some(m) = br.members.get_mut(name) {
                    m.claimed = true;
                    m.pending = Some(pending);
                    m.slot.begin(SyncState::PendingAdd, timer);
                }
            }
            Err(_) => {
                if let Some(t) = token {
                    self.inner.registry.release(t);
                }
                Self::member_mark_failed(br, name);
            }
        }
    }

    /// Detaches one member at the handler; the device-user is released
    /// when the `remove` confirmation arrives.
    fn bridge_disable_member(&self, br: &mut ManagedBridge, name: &str) {
        let Some(member) = br.members.get(name) else {
            return;
        };
        if !member.present {
            return;
        }
        match br.dev.binding.subscription().ensure(methods::REMOVE) {
            Ok(peer) => {
                let payload = json!({ "bridge": br.dev.name, "member": name });
                let pending = self.submit(peer, methods::REMOVE, payload, name);
                let timer = arm_timer(
                    self,
                    EntityKey::Member {
                        bridge: br.dev.name.clone(),
                        member: name.to_string(),
                    },
                    TIMEOUT_MS,
                );
                if let Some(m) = br.members.get_mut(name) {
                    m.pending = Some(pending);
                    m.slot.begin(SyncState::PendingRemove, timer);
                }
            }
            Err(_) => {
                // handler is gone, there is nobody to tell
            }
        }
        self.inner
            .registry
            .broadcast(&br.dev.name, DeviceEvent::TopologyChange);
    }

    /// Drops a configured member that went away: detach if the bridge is
    /// active, fix the counters, take the bridge down when it was the
    /// last one.
    pub(crate) fn bridge_remove_member(&self, br: &mut ManagedBridge, name: &str) {
        let present = br.members.get(name).map(|m| m.present).unwrap_or(false);
        if !present {
            return;
        }
        if br.active {
            self.bridge_disable_member(br, name);
        }
        if let Some(m) = br.members.get_mut(name) {
            m.present = false;
        }
        br.n_present = br.n_present.saturating_sub(1);
        if br.n_present == 0 && !br.force_active {
            self.inner.registry.set_present(&br.dev.name, false);
        }
    }

    /// Re-runs the enable pass after the bridge reached the handler, to
    /// pick up members that failed while it was being created.
    pub(crate) fn bridge_retry_enable_members(&self, br: &mut ManagedBridge) {
        br.n_failed = 0;
        for name in br.members.keys() {
            let eligible = match br.members.get(&name) {
                Some(m) => !m.present && self.inner.registry.is_present(&m.name),
                None => false,
            };
            if !eligible {
                continue;
            }
            if let Some(m) = br.members.get_mut(&name) {
                m.present = true;
            }
            br.n_present += 1;
            self.bridge_enable_member(br, &name);
        }
    }

    fn bridge_add_member(&self, br: &mut ManagedBridge, ifname: &str) {
        self.inner.registry.ensure_simple(ifname);
        if br.members.insert(BridgeMember::configured(ifname)) == InsertOutcome::KeptOld {
            return;
        }
        let token = self.attach_member_user(&br.dev.name, ifname);
        if let Some(m) = br.members.get_mut(ifname) {
            m.user = token;
        }
    }

    /// Binds a member's device-user relation into the registry. Registry
    /// events for the underlying device are routed back into
    /// [`member_event`](Self::member_event).
    pub(crate) fn attach_member_user(
        &self,
        bridge: &str,
        member: &str,
    ) -> Option<extdev_core::UserToken> {
        let user = Arc::new(MemberUser {
            controller: self.clone(),
            bridge: bridge.to_string(),
            member: member.to_string(),
        });
        self.inner.registry.add_user(member, user)
    }

    /// Final teardown of a member already detached from the list: fix
    /// counters, unbind the device-user and poke the underlying device so
    /// a competing bridge's claim is retried.
    pub(crate) fn free_member(&self, br: &mut ManagedBridge, mut member: BridgeMember) {
        if member.present {
            member.present = false;
            br.n_present = br.n_present.saturating_sub(1);
            if br.n_present == 0 && !br.force_active {
                self.inner.registry.set_present(&br.dev.name, false);
            }
        }
        if member.claimed
            && let Some(token) = member.user
        {
            self.inner.registry.release(token);
            member.claimed = false;
        }
        if let Some(token) = member.user.take() {
            self.inner.registry.remove_user(token);
        }
        // A reload may move a device between bridges; the new owner may
        // have tried to claim it while it was still ours. Toggling the
        // present flag retriggers that claim.
        if self.inner.registry.is_present(&member.name) {
            self.inner.registry.set_present(&member.name, false);
            self.inner.registry.set_present(&member.name, true);
        }
        // dropping the member cancels its retry timer and pending request
    }

    fn member_mark_failed(br: &mut ManagedBridge, name: &str) {
        let was_present = match br.members.get_mut(name) {
            Some(m) => {
                let was = m.present;
                m.present = false;
                was
            }
            None => return,
        };
        br.n_failed += 1;
        if was_present {
            br.n_present = br.n_present.saturating_sub(1);
        }
    }

    // =========================================================================
    // Registry event routing
    // =========================================================================

    pub(crate) fn member_event(&self, bridge: &str, member: &str, event: DeviceEvent) {
        let mut state = self.inner.state.lock();
        let Some(Managed::Bridge(br)) = state.devices.get_mut(bridge) else {
            return;
        };
        match event {
            DeviceEvent::Add => {
                let newly_present = match br.members.get_mut(member) {
                    Some(m) if !m.present => {
                        m.present = true;
                        true
                    }
                    _ => false,
                };
                if !newly_present {
                    return;
                }
                br.n_present += 1;
                if br.n_present == 1 {
                    self.inner.registry.set_present(&br.dev.name, true);
                }
                self.bridge_enable_member(br, member);
            }
            DeviceEvent::Remove => match br.members.get(member).map(|m| m.hotplug) {
                Some(true) => {
                    if let Some(m) = br.members.remove(member) {
                        self.free_member(br, m);
                    }
                }
                Some(false) => self.bridge_remove_member(br, member),
                None => {}
            },
            _ => {}
        }
    }

    // =========================================================================
    // Retry handling
    // =========================================================================

    pub(crate) fn retry_tick(&self, key: EntityKey) {
        let mut state = self.inner.state.lock();
        match key {
            EntityKey::Device(name) => self.device_tick(&mut state, &name),
            EntityKey::Member { bridge, member } => self.member_tick(&mut state, &bridge, &member),
        }
    }

    fn device_tick(&self, state: &mut State, name: &str) {
        let Some(managed) = state.devices.get_mut(name) else {
            return;
        };
        let binding = Arc::clone(&managed.dev().binding);
        if !binding.subscription().is_subscribed() {
            // handler outage: hold the state as is and look again later
            let timer = arm_timer(self, EntityKey::Device(name.to_string()), TIMEOUT_MS);
            managed.dev_mut().slot.rearm(timer);
            return;
        }
        let dev = managed.dev_mut();
        match dev.slot.tick() {
            TickAction::Idle => {}
            TickAction::GiveUp { method } => {
                error!(
                    device = %name,
                    method,
                    attempts = MAX_RETRIES,
                    "external handler never confirmed, giving up on device"
                );
            }
            TickAction::Retry { method } => {
                let payload = match dev.slot.state {
                    SyncState::PendingCreate | SyncState::PendingReload => dev.config.clone(),
                    SyncState::PendingPrepare => json!({ "bridge": name }),
                    _ => json!({ "name": name }),
                };
                let peer = binding.subscription().peer_id();
                dev.pending = Some(self.submit(peer, method, payload, name));
                let timer = arm_timer(self, EntityKey::Device(name.to_string()), TIMEOUT_MS);
                dev.slot.rearm(timer);
                debug!(device = %name, method, attempt = dev.slot.attempts, "re-invoking unconfirmed method");
            }
        }
    }

    fn member_tick(&self, state: &mut State, bridge: &str, member: &str) {
        let Some(Managed::Bridge(br)) = state.devices.get_mut(bridge) else {
            return;
        };
        let binding = Arc::clone(&br.dev.binding);
        let key = EntityKey::Member {
            bridge: bridge.to_string(),
            member: member.to_string(),
        };
        if !binding.subscription().is_subscribed() {
            if let Some(m) = br.members.get_mut(member) {
                let timer = arm_timer(self, key, TIMEOUT_MS);
                m.slot.rearm(timer);
            }
            return;
        }
        let bridge_name = br.dev.name.clone();
        let Some(m) = br.members.get_mut(member) else {
            return;
        };
        match m.slot.tick() {
            TickAction::Idle => {}
            TickAction::GiveUp { method } => {
                error!(
                    bridge = %bridge_name,
                    member = %member,
                    method,
                    attempts = MAX_RETRIES,
                    "external handler never confirmed, giving up on member"
                );
            }
            TickAction::Retry { method } => {
                let payload = json!({ "bridge": bridge_name, "member": member });
                let peer = binding.subscription().peer_id();
                m.pending = Some(self.submit(peer, method, payload, member));
                let timer = arm_timer(self, key, TIMEOUT_MS);
                m.slot.rearm(timer);
                debug!(bridge = %bridge_name, member = %member, method, attempt = m.slot.attempts, "re-invoking unconfirmed method");
            }
        }
    }

    // =========================================================================
    // Subscription plumbing
    // =========================================================================

    pub(crate) fn handle_peer_removed(&self, type_name: &str) {
        let binding = self.inner.state.lock().bindings.get(type_name).cloned();
        if let Some(binding) = binding {
            binding.subscription().handle_peer_removed();
        }
    }

    pub(crate) async fn object_added(&self, name: String) {
        let bindings: Vec<Arc<DeviceTypeBinding>> = {
            let state = self.inner.state.lock();
            state.bindings.values().cloned().collect()
        };
        for binding in bindings {
            if binding.subscription().peer_name() != name
                || binding.subscription().is_subscribed()
            {
                continue;
            }
            let sink = self.sink_for(binding.name());
            match binding.subscription().handle_object_added(&name, sink).await {
                Ok(true) => {
                    info!(ty = %binding.name(), peer = %name, "resubscribed to external handler");
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(ty = %binding.name(), peer = %name, %err, "resubscription attempt failed");
                }
            }
        }
    }

    // =========================================================================
    // Invocation plumbing
    // =========================================================================

    fn submit(&self, peer: u32, method: &'static str, payload: Value, device: &str) -> PendingRequest {
        let device = device.to_string();
        self.inner.invoker.invoke_async(
            peer,
            method,
            payload,
            Box::new(move |result| {
                if let Err(err) = result {
                    error!(
                        method,
                        device = %device,
                        status = err.status_code(),
                        "invocation of method failed"
                    );
                }
            }),
        )
    }
}

// =============================================================================
// Callback adapters
// =============================================================================

/// Per-binding notification receiver registered on the bus.
struct BindingSink {
    controller: Controller,
    type_name: String,
}

impl NotificationSink for BindingSink {
    fn notify(&self, kind: &str, payload: Value) -> i32 {
        self.controller.dispatch_notification(kind, payload)
    }

    fn peer_removed(&self) {
        self.controller.handle_peer_removed(&self.type_name);
    }
}

/// Bus-global object watcher feeding resubscription.
struct ControllerWatcher {
    controller: Controller,
}

impl ObjectWatcher for ControllerWatcher {
    fn object_added(&self, name: &str, _id: u32) {
        let interested = {
            let state = self.controller.inner.state.lock();
            state.bindings.values().any(|b| {
                b.subscription().peer_name() == name && !b.subscription().is_subscribed()
            })
        };
        if !interested {
            return;
        }
        let controller = self.controller.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            controller.object_added(name).await;
        });
    }
}

/// Device-user callback for bridge members. Registry events may fire while
/// controller state is borrowed, so the work is deferred to the loop.
struct MemberUser {
    controller: Controller,
    bridge: String,
    member: String,
}

impl DeviceUser for MemberUser {
    fn on_event(&self, _device: &str, event: DeviceEvent) {
        let controller = self.controller.clone();
        let bridge = self.bridge.clone();
        let member = self.member.clone();
        tokio::spawn(async move {
            controller.member_event(&bridge, &member, event);
        });
    }
}
