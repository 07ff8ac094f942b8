//! Notification dispatch.
//!
//! The external handler confirms every mutating operation with an
//! unsolicited notification carrying the operation name and a small
//! payload. Device-level notifications (`create`, `reload`, `free`,
//! `prepare`) carry `{name}`; member-level ones (`add`, `remove`) carry
//! `{bridge, member}`. Unknown kinds are refused as unsupported, missing
//! fields as invalid arguments.
//!
//! Dispatch is idempotent: a notification whose target entity already
//! reached the notified state returns 0 without side effects, so duplicate
//! deliveries and confirmations racing a late retry are harmless. A
//! notification for an entity that no longer exists is a no-op.

use serde_json::Value;
use tracing::{info, warn};

use extdev_core::{DeviceEvent, SyncState, methods, status};

use crate::controller::Controller;
use crate::entity::{BridgeMember, Managed};

impl Controller {
    /// Routes one subscribed notification. Returns the transport status
    /// reported back to the notifying peer.
    pub(crate) fn dispatch_notification(&self, kind: &str, payload: Value) -> i32 {
        let code = self.route(kind, &payload);
        if code != status::OK {
            warn!(kind = %kind, code, "notification refused");
        }
        code
    }

    fn route(&self, kind: &str, payload: &Value) -> i32 {
        match kind {
            methods::CREATE | methods::RELOAD | methods::FREE | methods::PREPARE => {
                let Some(name) = payload.get("name").and_then(Value::as_str) else {
                    return status::INVALID_ARGUMENT;
                };
                match kind {
                    methods::CREATE => self.notify_create(name),
                    methods::RELOAD => self.notify_reload(name),
                    methods::FREE => self.notify_free(name),
                    _ => self.notify_prepare(name),
                }
            }
            methods::ADD | methods::REMOVE => {
                let (Some(bridge), Some(member)) = (
                    payload.get("bridge").and_then(Value::as_str),
                    payload.get("member").and_then(Value::as_str),
                ) else {
                    return status::INVALID_ARGUMENT;
                };
                if kind == methods::ADD {
                    self.notify_member_add(bridge, member)
                } else {
                    self.notify_member_remove(bridge, member)
                }
            }
            _ => status::NOT_SUPPORTED,
        }
    }

    fn notify_create(&self, name: &str) -> i32 {
        let mut state = self.inner.state.lock();
        match state.devices.get_mut(name) {
            None => status::OK,
            Some(Managed::Plain(dev)) => {
                if dev.slot.confirm(SyncState::PendingCreate) {
                    dev.pending = None;
                    self.inner.registry.set_present(name, true);
                    info!(device = %name, "external device created");
                }
                status::OK
            }
            Some(Managed::Bridge(br)) => {
                if !br.dev.slot.confirm(SyncState::PendingCreate) {
                    return status::OK;
                }
                br.dev.pending = None;
                // bring the bridge up through the preserved state path
                let ret = self.inner.registry.set_link_state(name, true);
                if ret != status::OK {
                    let _ = self.bridge_set_down(br);
                    return ret;
                }
                br.active = true;
                self.inner.registry.set_present(name, true);
                info!(device = %name, "external bridge created");
                self.bridge_retry_enable_members(br);
                status::OK
            }
        }
    }

    fn notify_reload(&self, name: &str) -> i32 {
        let mut state = self.inner.state.lock();
        match state.devices.get_mut(name) {
            None => status::OK,
            Some(Managed::Plain(dev)) => {
                if dev.slot.confirm(SyncState::PendingReload) {
                    dev.pending = None;
                    self.inner.registry.set_present(name, true);
                }
                status::OK
            }
            Some(Managed::Bridge(br)) => {
                if br.dev.slot.confirm(SyncState::PendingReload) {
                    br.dev.pending = None;
                }
                status::OK
            }
        }
    }

    fn notify_free(&self, name: &str) -> i32 {
        enum Action {
            Ignore,
            RemovePlain,
            DestroyBridge,
            CompleteDisable,
            Deactivate,
        }

        let mut state = self.inner.state.lock();
        let action = match state.devices.get(name) {
            None => Action::Ignore,
            Some(Managed::Plain(dev)) => {
                if dev.slot.state == SyncState::PendingFree {
                    Action::RemovePlain
                } else {
                    Action::Ignore
                }
            }
            Some(Managed::Bridge(br)) => match br.dev.slot.state {
                SyncState::PendingFree => Action::DestroyBridge,
                SyncState::PendingDisable => Action::CompleteDisable,
                // the handler let go of a bridge we did not mark for
                // deletion: it is merely deactivated, config and members
                // stay available
                _ => Action::Deactivate,
            },
        };

        match action {
            Action::Ignore => {}
            Action::RemovePlain => {
                state.devices.remove(name);
                self.inner.registry.remove(name);
                info!(device = %name, "external device freed");
            }
            Action::DestroyBridge => {
                if let Some(Managed::Bridge(mut br)) = state.devices.remove(name) {
                    for mut member in br.members.drain() {
                        if member.claimed
                            && let Some(token) = member.user
                        {
                            self.inner.registry.release(token);
                        }
                        if let Some(token) = member.user.take() {
                            self.inner.registry.remove_user(token);
                        }
                    }
                    self.inner.registry.remove(name);
                    info!(device = %name, "external bridge freed");
                }
            }
            Action::CompleteDisable => {
                if let Some(Managed::Bridge(br)) = state.devices.get_mut(name) {
                    br.dev.slot.confirm(SyncState::PendingDisable);
                    br.dev.pending = None;
                    br.active = false;
                }
            }
            Action::Deactivate => {
                if let Some(Managed::Bridge(br)) = state.devices.get_mut(name) {
                    br.active = false;
                }
            }
        }
        status::OK
    }

    fn notify_prepare(&self, name: &str) -> i32 {
        let mut state = self.inner.state.lock();
        if let Some(Managed::Bridge(br)) = state.devices.get_mut(name)
            && br.dev.slot.confirm(SyncState::PendingPrepare)
        {
            br.dev.pending = None;
            br.force_active = true;
            self.inner.registry.set_present(name, true);
        }
        status::OK
    }

    fn notify_member_add(&self, bridge: &str, member: &str) -> i32 {
        let mut state = self.inner.state.lock();
        let Some(Managed::Bridge(br)) = state.devices.get_mut(bridge) else {
            // nothing to attach to; drop the hold taken at hotplug time
            self.inner.registry.unlock();
            return status::NOT_FOUND;
        };

        if let Some(m) = br.members.get_mut(member) {
            let confirmed = m.slot.confirm(SyncState::PendingAdd);
            if confirmed {
                m.pending = None;
                self.inner
                    .registry
                    .broadcast(bridge, DeviceEvent::TopologyChange);
            }
            return status::OK;
        }

        // the member was added by something other than the controller:
        // create a hotplug slot for it, born synchronized
        if self.inner.registry.kind(member).is_none() {
            self.inner.registry.unlock();
            return status::NOT_FOUND;
        }
        br.members.insert(BridgeMember::hotplug(member));
        let token = self.attach_member_user(bridge, member);
        if let Some(m) = br.members.get_mut(member) {
            m.user = token;
        }
        self.inner.registry.unlock();
        info!(bridge = %bridge, member = %member, "hotplug member attached");
        status::OK
    }

    fn notify_member_remove(&self, bridge: &str, member: &str) -> i32 {
        let mut state = self.inner.state.lock();
        let Some(Managed::Bridge(br)) = state.devices.get_mut(bridge) else {
            return status::OK;
        };
        let Some(m) = br.members.get_mut(member) else {
            return status::OK;
        };
        if m.slot.confirm(SyncState::PendingRemove) {
            m.pending = None;
            if m.claimed
                && let Some(token) = m.user
            {
                self.inner.registry.release(token);
            }
            m.claimed = false;
        }
        status::OK
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use extdev_bus::loopback::LoopbackBus;
    use extdev_core::schema::FieldSpec;
    use extdev_core::{
        ControllerError, DeviceChange, DeviceRegistry, MemoryRegistry, Schema, SyncState, status,
    };

    use crate::binding::TypeDescriptor;
    use crate::controller::Controller;
    use crate::retry::{EntityKey, MAX_RETRIES};

    const BR_PEER: &str = "network.brdev";
    const WIFI_PEER: &str = "network.wifi";

    /// Lets spawned invocation, timer and event tasks run to completion on
    /// the current-thread test runtime.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn schema(json: &str) -> Schema {
        let specs: Vec<FieldSpec> = serde_json::from_str(json).unwrap();
        Schema::from_specs(&specs)
    }

    fn bridge_descriptor() -> TypeDescriptor {
        TypeDescriptor {
            name: "brdev".into(),
            peer_name: BR_PEER.into(),
            bridge_capability: true,
            bridge_prefix: Some("br-".into()),
            config_schema: schema(r#"[{"name": "mtu", "type": "u32"}]"#),
            info_schema: Some(schema(r#"[{"name": "mtu", "type": "u32"}]"#)),
            stats_schema: None,
        }
    }

    fn wifi_descriptor() -> TypeDescriptor {
        TypeDescriptor {
            name: "wifi".into(),
            peer_name: WIFI_PEER.into(),
            bridge_capability: false,
            bridge_prefix: None,
            config_schema: schema(r#"[{"name": "ssid", "type": "string"}]"#),
            info_schema: None,
            stats_schema: None,
        }
    }

    async fn setup() -> (Arc<LoopbackBus>, Arc<MemoryRegistry>, Controller) {
        let bus = LoopbackBus::new();
        bus.add_object(BR_PEER);
        bus.add_object(WIFI_PEER);
        let registry = MemoryRegistry::new();
        let controller = Controller::new(bus.clone(), registry.clone());
        controller.add_type(bridge_descriptor()).await.unwrap();
        controller.add_type(wifi_descriptor()).await.unwrap();
        (bus, registry, controller)
    }

    // =========================================================================
    // End-to-end scenarios
    // =========================================================================

    #[tokio::test]
    async fn empty_bridge_is_created_on_config_init() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br0", json!({"empty": true}))
            .unwrap();
        ctrl.config_init("br0").unwrap();
        settle().await;

        let log = bus.take_invocations();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].method, "create");
        assert_eq!(log[0].payload, json!({"empty": true}));
        assert_eq!(ctrl.snapshot("br0").unwrap().sync, SyncState::PendingCreate);

        assert_eq!(bus.notify(BR_PEER, "create", json!({"name": "br0"})), 0);
        let snap = ctrl.snapshot("br0").unwrap();
        assert_eq!(snap.sync, SyncState::Synchronized);
        assert!(!snap.timer_armed);
        let bridge = snap.bridge.unwrap();
        assert!(bridge.active);
        assert!(bridge.force_active);
        assert!(bridge.empty);
        assert!(registry.is_present("br0"));
    }

    #[tokio::test]
    async fn configured_member_bring_up_chain() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br1", json!({"ifname": ["eth0"]}))
            .unwrap();
        ctrl.config_init("br1").unwrap();
        settle().await;

        // the member slot exists and waits for its add; nothing went out
        let snap = ctrl.snapshot("br1").unwrap();
        let member = &snap.bridge.as_ref().unwrap().members[0];
        assert_eq!(member.name, "eth0");
        assert_eq!(member.sync, SyncState::PendingAdd);
        assert!(!member.present);
        assert!(bus.invocations().is_empty());

        // the underlying device appears: the bridge create goes out first
        registry.set_present("eth0", true);
        settle().await;
        let log = bus.take_invocations();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].method, "create");
        assert_eq!(ctrl.snapshot("br1").unwrap().sync, SyncState::PendingCreate);

        // create confirmation: the enable pass re-runs and issues the add
        assert_eq!(bus.notify(BR_PEER, "create", json!({"name": "br1"})), 0);
        settle().await;
        let log = bus.take_invocations();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].method, "add");
        assert_eq!(log[0].payload, json!({"bridge": "br1", "member": "eth0"}));
        let snap = ctrl.snapshot("br1").unwrap();
        assert_eq!(snap.sync, SyncState::Synchronized);
        let member = &snap.bridge.as_ref().unwrap().members[0];
        assert!(member.present);
        assert_eq!(member.sync, SyncState::PendingAdd);
        assert!(member.timer_armed);

        // add confirmation: member synchronized, counters consistent
        assert_eq!(
            bus.notify(BR_PEER, "add", json!({"bridge": "br1", "member": "eth0"})),
            0
        );
        let snap = ctrl.snapshot("br1").unwrap();
        let bridge = snap.bridge.unwrap();
        assert_eq!(bridge.n_present, 1);
        assert_eq!(bridge.members[0].sync, SyncState::Synchronized);
        assert!(!bridge.members[0].timer_armed);
        assert_eq!(
            bridge.n_present,
            bridge.members.iter().filter(|m| m.present).count()
        );
    }

    #[tokio::test]
    async fn lost_create_confirmation_retries_then_quarantines() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br1", json!({"ifname": ["eth0"]}))
            .unwrap();
        ctrl.config_init("br1").unwrap();
        registry.set_present("eth0", true);
        settle().await;
        assert_eq!(bus.take_invocations().len(), 1); // the initial create

        for attempt in 1..=MAX_RETRIES {
            ctrl.retry_tick(EntityKey::Device("br1".into()));
            settle().await;
            let log = bus.take_invocations();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].method, "create");
            let snap = ctrl.snapshot("br1").unwrap();
            assert_eq!(snap.attempts, attempt);
            assert!(snap.timer_armed);
        }

        // one tick past the budget: no further invocation, timer idle
        ctrl.retry_tick(EntityKey::Device("br1".into()));
        settle().await;
        assert!(bus.take_invocations().is_empty());
        let snap = ctrl.snapshot("br1").unwrap();
        assert_eq!(snap.sync, SyncState::PendingCreate);
        assert_eq!(snap.attempts, MAX_RETRIES);
        assert!(!snap.timer_armed);
    }

    #[tokio::test]
    async fn handler_loss_refuses_operations_until_resubscribed() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br2", json!({"empty": true}))
            .unwrap();
        ctrl.config_init("br2").unwrap();
        settle().await;
        bus.notify(BR_PEER, "create", json!({"name": "br2"}));
        assert_eq!(ctrl.snapshot("br2").unwrap().sync, SyncState::Synchronized);
        bus.take_invocations();

        bus.remove_object(BR_PEER);
        let binding = ctrl.binding("brdev").unwrap();
        assert!(!binding.subscription().is_subscribed());

        let err = ctrl
            .reload("br2", json!({"empty": true, "mtu": 9000}))
            .unwrap_err();
        assert!(matches!(err, ControllerError::NotSubscribed { .. }));
        assert_eq!(ctrl.snapshot("br2").unwrap().sync, SyncState::Synchronized);
        assert!(bus.invocations().is_empty());

        // the handler comes back; a matching object-add resubscribes
        bus.add_object(BR_PEER);
        settle().await;
        assert!(binding.subscription().is_subscribed());

        let change = ctrl
            .reload("br2", json!({"empty": true, "mtu": 9000}))
            .unwrap();
        assert_eq!(change, DeviceChange::Restart);
        settle().await;
        let log = bus.take_invocations();
        assert_eq!(log[0].method, "reload");
        assert_eq!(ctrl.snapshot("br2").unwrap().sync, SyncState::PendingReload);
    }

    #[tokio::test]
    async fn hotplug_add_creates_the_member_on_confirmation() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br0", json!({"empty": true}))
            .unwrap();
        ctrl.config_init("br0").unwrap();
        settle().await;
        bus.notify(BR_PEER, "create", json!({"name": "br0"}));
        bus.take_invocations();

        ctrl.hotplug_add("br0", "wlan0").unwrap();
        settle().await;
        let log = bus.take_invocations();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].method, "add");
        assert_eq!(log[0].payload, json!({"bridge": "br0", "member": "wlan0"}));

        // the registry hold keeps the unclaimed simple device alive
        registry.flush_unused();
        assert!(registry.kind("wlan0").is_some());

        assert_eq!(
            bus.notify(BR_PEER, "add", json!({"bridge": "br0", "member": "wlan0"})),
            0
        );
        settle().await;
        let snap = ctrl.snapshot("br0").unwrap();
        let members = &snap.bridge.as_ref().unwrap().members;
        assert_eq!(members.len(), 1);
        assert!(members[0].hotplug);
        assert_eq!(members[0].sync, SyncState::Synchronized);
    }

    #[tokio::test]
    async fn duplicate_add_notification_has_no_side_effects() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br0", json!({"empty": true}))
            .unwrap();
        ctrl.config_init("br0").unwrap();
        settle().await;
        bus.notify(BR_PEER, "create", json!({"name": "br0"}));
        ctrl.hotplug_add("br0", "wlan0").unwrap();
        settle().await;
        bus.notify(BR_PEER, "add", json!({"bridge": "br0", "member": "wlan0"}));
        settle().await;

        let before = ctrl.snapshot("br0").unwrap().bridge.unwrap();
        assert_eq!(
            bus.notify(BR_PEER, "add", json!({"bridge": "br0", "member": "wlan0"})),
            0
        );
        settle().await;
        let after = ctrl.snapshot("br0").unwrap().bridge.unwrap();
        assert_eq!(after.members.len(), before.members.len());
        assert_eq!(after.n_present, before.n_present);
        assert_eq!(after.members[0].sync, SyncState::Synchronized);
    }

    // =========================================================================
    // Lifecycle and dispatcher properties
    // =========================================================================

    #[tokio::test]
    async fn plain_device_round_trip_leaves_no_state() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("wifi", "wl0", json!({"ssid": "lab"}))
            .unwrap();
        settle().await;
        assert_eq!(bus.take_invocations()[0].method, "create");

        bus.notify(WIFI_PEER, "create", json!({"name": "wl0"}));
        assert_eq!(ctrl.snapshot("wl0").unwrap().sync, SyncState::Synchronized);
        assert!(registry.is_present("wl0"));

        let change = ctrl.reload("wl0", json!({"ssid": "field"})).unwrap();
        assert_eq!(change, DeviceChange::Applied);
        settle().await;
        assert_eq!(bus.take_invocations()[0].method, "reload");
        bus.notify(WIFI_PEER, "reload", json!({"name": "wl0"}));
        assert_eq!(ctrl.snapshot("wl0").unwrap().sync, SyncState::Synchronized);

        ctrl.free_device("wl0").unwrap();
        settle().await;
        assert_eq!(bus.take_invocations()[0].method, "free");
        bus.notify(WIFI_PEER, "free", json!({"name": "wl0"}));
        assert!(!ctrl.has_device("wl0"));
        assert_eq!(registry.kind("wl0"), None);
    }

    #[tokio::test]
    async fn plain_config_init_waits_for_the_create_confirmation() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("wifi", "wl0", json!({"ssid": "lab"}))
            .unwrap();
        settle().await;

        // the create is still unconfirmed, so the device must not be
        // marked present ahead of the handshake
        ctrl.config_init("wl0").unwrap();
        assert!(!registry.is_present("wl0"));
        assert_eq!(ctrl.snapshot("wl0").unwrap().sync, SyncState::PendingCreate);

        bus.notify(WIFI_PEER, "create", json!({"name": "wl0"}));
        assert!(registry.is_present("wl0"));

        // once confirmed, config_init applies directly
        registry.set_present("wl0", false);
        ctrl.config_init("wl0").unwrap();
        assert!(registry.is_present("wl0"));
    }

    #[tokio::test]
    async fn identical_reload_is_a_no_change() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("wifi", "wl0", json!({"ssid": "lab"}))
            .unwrap();
        settle().await;
        bus.notify(WIFI_PEER, "create", json!({"name": "wl0"}));
        bus.take_invocations();

        let change = ctrl.reload("wl0", json!({"ssid": "lab"})).unwrap();
        assert_eq!(change, DeviceChange::None);
        settle().await;
        assert!(bus.invocations().is_empty());
    }

    #[tokio::test]
    async fn bridge_disable_is_reversible_free_is_terminal() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br1", json!({"ifname": ["eth0"]}))
            .unwrap();
        ctrl.config_init("br1").unwrap();
        registry.set_present("eth0", true);
        settle().await;
        bus.notify(BR_PEER, "create", json!({"name": "br1"}));
        settle().await;
        bus.notify(BR_PEER, "add", json!({"bridge": "br1", "member": "eth0"}));
        bus.take_invocations();

        // down: members detached, then the bridge itself
        ctrl.set_state("br1", false).unwrap();
        settle().await;
        let methods: Vec<_> = bus
            .take_invocations()
            .into_iter()
            .map(|i| i.method)
            .collect();
        assert_eq!(methods, ["remove", "free"]);
        let snap = ctrl.snapshot("br1").unwrap();
        assert_eq!(snap.sync, SyncState::PendingDisable);
        assert!(!snap.bridge.as_ref().unwrap().active);

        bus.notify(BR_PEER, "remove", json!({"bridge": "br1", "member": "eth0"}));
        bus.notify(BR_PEER, "free", json!({"name": "br1"}));
        let snap = ctrl.snapshot("br1").unwrap();
        // disabled, not destroyed: the wrapper and its members survive
        assert_eq!(snap.sync, SyncState::Synchronized);
        assert!(!snap.bridge.as_ref().unwrap().active);
        assert_eq!(snap.bridge.as_ref().unwrap().members.len(), 1);

        // terminal free destroys the wrapper
        ctrl.free_device("br1").unwrap();
        settle().await;
        assert_eq!(bus.take_invocations()[0].method, "free");
        bus.notify(BR_PEER, "free", json!({"name": "br1"}));
        assert!(!ctrl.has_device("br1"));
    }

    #[tokio::test]
    async fn hotplug_on_a_non_bridge_is_refused_up_front() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("wifi", "wl0", json!({"ssid": "lab"}))
            .unwrap();
        settle().await;
        bus.notify(WIFI_PEER, "create", json!({"name": "wl0"}));
        bus.take_invocations();

        let err = ctrl.hotplug_add("wl0", "eth0").unwrap_err();
        assert_eq!(err.status_code(), status::NOT_SUPPORTED);
        let err = ctrl.hotplug_prepare("wl0").unwrap_err();
        assert_eq!(err.status_code(), status::NOT_SUPPORTED);
        settle().await;
        // refused before anything went out or was mutated
        assert!(bus.invocations().is_empty());
        assert_eq!(ctrl.snapshot("wl0").unwrap().sync, SyncState::Synchronized);
    }

    #[tokio::test]
    async fn prepare_forces_the_bridge_present() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br0", json!({})).unwrap();
        ctrl.config_init("br0").unwrap();
        settle().await;
        bus.take_invocations();

        ctrl.hotplug_prepare("br0").unwrap();
        settle().await;
        let log = bus.take_invocations();
        assert_eq!(log[0].method, "prepare");
        assert_eq!(log[0].payload, json!({"bridge": "br0"}));
        assert_eq!(ctrl.snapshot("br0").unwrap().sync, SyncState::PendingPrepare);

        bus.notify(BR_PEER, "prepare", json!({"name": "br0"}));
        let snap = ctrl.snapshot("br0").unwrap();
        assert_eq!(snap.sync, SyncState::Synchronized);
        assert!(snap.bridge.unwrap().force_active);
        assert!(registry.is_present("br0"));
    }

    #[tokio::test]
    async fn bringing_up_a_memberless_bridge_fails_unless_forced() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br3", json!({})).unwrap();
        ctrl.config_init("br3").unwrap();
        settle().await;

        let err = ctrl.set_state("br3", true).unwrap_err();
        assert_eq!(err.status_code(), status::NOT_FOUND);

        // once prepared, the bridge stays usable without members
        ctrl.hotplug_prepare("br3").unwrap();
        settle().await;
        bus.notify(BR_PEER, "prepare", json!({"name": "br3"}));
        ctrl.set_state("br3", true).unwrap();
    }

    #[tokio::test]
    async fn reconfiguration_keeps_member_slots_unique() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br1", json!({"ifname": ["eth0", "eth1"]}))
            .unwrap();
        ctrl.config_init("br1").unwrap();
        settle().await;
        assert_eq!(
            ctrl.snapshot("br1").unwrap().bridge.unwrap().members.len(),
            2
        );
        bus.notify(BR_PEER, "create", json!({"name": "br1"}));

        // eth1 drops out of the configuration, eth0 stays
        ctrl.reload("br1", json!({"ifname": ["eth0"]})).unwrap();
        settle().await;
        bus.notify(BR_PEER, "reload", json!({"name": "br1"}));
        ctrl.config_init("br1").unwrap();
        settle().await;

        let members = ctrl.snapshot("br1").unwrap().bridge.unwrap().members;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "eth0");
        // the flushed member's device was poked so competing claims retry
        registry.flush_unused();
        assert_eq!(registry.kind("eth1"), None);
    }

    #[tokio::test]
    async fn malformed_and_unknown_notifications_are_refused() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br0", json!({"empty": true}))
            .unwrap();
        ctrl.config_init("br0").unwrap();
        settle().await;

        assert_eq!(
            bus.notify(BR_PEER, "create", json!({})),
            status::INVALID_ARGUMENT
        );
        assert_eq!(
            bus.notify(BR_PEER, "add", json!({"bridge": "br0"})),
            status::INVALID_ARGUMENT
        );
        assert_eq!(
            bus.notify(BR_PEER, "promote", json!({"name": "br0"})),
            status::NOT_SUPPORTED
        );
        // refused notifications changed nothing
        assert_eq!(ctrl.snapshot("br0").unwrap().sync, SyncState::PendingCreate);
    }

    #[tokio::test]
    async fn notifications_for_unknown_devices_are_no_ops() {
        let (bus, _registry, ctrl) = setup().await;
        assert_eq!(bus.notify(BR_PEER, "create", json!({"name": "ghost"})), 0);
        assert_eq!(bus.notify(BR_PEER, "free", json!({"name": "ghost"})), 0);
        assert!(!ctrl.has_device("ghost"));
    }

    #[tokio::test]
    async fn frozen_retries_do_not_burn_attempts_during_an_outage() {
        let (bus, registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br1", json!({"ifname": ["eth0"]}))
            .unwrap();
        ctrl.config_init("br1").unwrap();
        registry.set_present("eth0", true);
        settle().await;
        bus.take_invocations();

        bus.remove_object(BR_PEER);
        ctrl.retry_tick(EntityKey::Device("br1".into()));
        settle().await;
        let snap = ctrl.snapshot("br1").unwrap();
        // held in place: no attempt consumed, timer re-armed, nothing sent
        assert_eq!(snap.attempts, 0);
        assert!(snap.timer_armed);
        assert_eq!(snap.sync, SyncState::PendingCreate);
        assert!(bus.invocations().is_empty());
    }

    #[tokio::test]
    async fn dump_info_projects_the_reply() {
        let (bus, _registry, ctrl) = setup().await;
        ctrl.create_device("brdev", "br0", json!({"empty": true}))
            .unwrap();
        ctrl.config_init("br0").unwrap();
        settle().await;
        bus.notify(BR_PEER, "create", json!({"name": "br0"}));

        bus.script_reply("dump_info", Ok(json!({"mtu": 1500, "vendor": "acme"})));
        let info = ctrl.dump_info("br0").await.unwrap();
        assert_eq!(info, json!({"mtu": 1500}));

        // no stats schema was declared, so the operation is unset
        let err = ctrl.dump_stats("br0").await.unwrap_err();
        assert_eq!(err.status_code(), status::NOT_SUPPORTED);
    }
}
