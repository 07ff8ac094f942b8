//! Daemon-side device registry model.
//!
//! The host daemon owns every `device` object; the controller only ever
//! holds wrappers and *device-user* relations (non-owning registrations of
//! interest). This module carries the registry interface the controller
//! talks to, plus [`MemoryRegistry`], the in-memory reference implementation
//! used by the runtime and the test suites.
//!
//! Devices are stored with a tagged [`DeviceKind`] discriminator; callers
//! pattern-match on it instead of downcasting wrapper structs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{ControllerError, ControllerResult};

/// Discriminator for registry entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// A plain device the daemon manages directly (e.g. a member interface).
    Simple,
    /// An externally-managed device proxied by the controller.
    External,
    /// An externally-managed bridge with member devices.
    ExternalBridge,
}

/// Events broadcast to device users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device became present.
    Add,
    /// The device went away.
    Remove,
    /// Bridge membership changed.
    TopologyChange,
    /// Bring-up of the device failed.
    SetupFailed,
}

/// Classification of a configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    /// The new configuration is identical.
    None,
    /// The change applies without tearing the device down.
    Applied,
    /// The device has to be torn down and re-created.
    Restart,
}

/// Identifies one device-user relation. Opaque; releasing or removing an
/// unknown token is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserToken(u64);

/// Callback interface for device users.
///
/// Implementations must not call back into the registry synchronously from
/// `on_event`; defer re-entrant work to the event loop instead.
pub trait DeviceUser: Send + Sync {
    fn on_event(&self, device: &str, event: DeviceEvent);
}

/// The registry interface the controller depends on. The production
/// implementation lives in the host daemon; [`MemoryRegistry`] stands in
/// for it in the runtime and in tests.
pub trait DeviceRegistry: Send + Sync {
    /// Registers a device entry. Returns false if the name is taken.
    fn insert(&self, name: &str, kind: DeviceKind) -> bool;

    /// Drops a device entry and all its user relations.
    fn remove(&self, name: &str);

    /// Returns the discriminator for a known device.
    fn kind(&self, name: &str) -> Option<DeviceKind>;

    /// Gets or creates a [`DeviceKind::Simple`] entry.
    fn ensure_simple(&self, name: &str);

    fn is_present(&self, name: &str) -> bool;

    /// Flips the present flag, broadcasting `Add`/`Remove` to the device's
    /// users on an actual change.
    fn set_present(&self, name: &str, present: bool);

    /// Registers interest in a device. The user receives an immediate
    /// `Add` event if the device is already present. Returns `None` when
    /// the device does not exist.
    fn add_user(&self, device: &str, user: Arc<dyn DeviceUser>) -> Option<UserToken>;

    fn remove_user(&self, token: UserToken);

    /// Brings the underlying device up on behalf of a user relation.
    fn claim(&self, token: UserToken) -> ControllerResult<()>;

    /// Undoes a claim. The device is brought down with the last release.
    fn release(&self, token: UserToken);

    /// Suppresses the free-unused sweep until the matching [`unlock`].
    /// Holds nest.
    ///
    /// [`unlock`]: DeviceRegistry::unlock
    fn lock(&self);

    fn unlock(&self);

    /// Frees simple devices with no users and no claims, unless locked.
    fn flush_unused(&self);

    /// Broadcasts an event to all users of a device.
    fn broadcast(&self, device: &str, event: DeviceEvent);

    /// The daemon-default state path: flips the device's link state
    /// directly. Returns a transport status code, 0 on success.
    fn set_link_state(&self, name: &str, up: bool) -> i32;

    fn link_state(&self, name: &str) -> bool;
}

// =============================================================================
// MemoryRegistry
// =============================================================================

struct DeviceEntry {
    kind: DeviceKind,
    present: bool,
    link_up: bool,
    claims: u32,
}

struct UserEntry {
    device: String,
    user: Arc<dyn DeviceUser>,
}

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, DeviceEntry>,
    users: HashMap<u64, UserEntry>,
    next_token: u64,
    lock_hold: usize,
}

/// In-memory reference implementation of [`DeviceRegistry`].
///
/// Events are dispatched synchronously to the registered users, after the
/// internal lock has been dropped, so user callbacks may touch the registry
/// again as long as they defer to the event loop first.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<RegistryInner>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn users_of(inner: &RegistryInner, device: &str) -> Vec<Arc<dyn DeviceUser>> {
        inner
            .users
            .values()
            .filter(|u| u.device == device)
            .map(|u| Arc::clone(&u.user))
            .collect()
    }

    fn dispatch(users: Vec<Arc<dyn DeviceUser>>, device: &str, event: DeviceEvent) {
        for user in users {
            user.on_event(device, event);
        }
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn insert(&self, name: &str, kind: DeviceKind) -> bool {
        let mut inner = self.inner.lock();
        if inner.devices.contains_key(name) {
            return false;
        }
        debug!(device = %name, ?kind, "registering device");
        inner.devices.insert(
            name.to_string(),
            DeviceEntry {
                kind,
                present: false,
                link_up: false,
                claims: 0,
            },
        );
        true
    }

    fn remove(&self, name: &str) {
        let mut inner = self.inner.lock();
        if inner.devices.remove(name).is_some() {
            debug!(device = %name, "removing device");
            inner.users.retain(|_, u| u.device != name);
        }
    }

    fn kind(&self, name: &str) -> Option<DeviceKind> {
        self.inner.lock().devices.get(name).map(|d| d.kind)
    }

    fn ensure_simple(&self, name: &str) {
        let mut inner = self.inner.lock();
        inner.devices.entry(name.to_string()).or_insert_with(|| {
            trace!(device = %name, "creating simple device");
            DeviceEntry {
                kind: DeviceKind::Simple,
                present: false,
                link_up: false,
                claims: 0,
            }
        });
    }

    fn is_present(&self, name: &str) -> bool {
        self.inner
            .lock()
            .devices
            .get(name)
            .map(|d| d.present)
            .unwrap_or(false)
    }

    fn set_present(&self, name: &str, present: bool) {
        let users = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.devices.get_mut(name) else {
                return;
            };
            if entry.present == present {
                return;
            }
            entry.present = present;
            Self::users_of(&inner, name)
        };
        let event = if present {
            DeviceEvent::Add
        } else {
            DeviceEvent::Remove
        };
        trace!(device = %name, ?event, "present flag changed");
        Self::dispatch(users, name, event);
    }

    fn add_user(&self, device: &str, user: Arc<dyn DeviceUser>) -> Option<UserToken> {
        let (token, present) = {
            let mut inner = self.inner.lock();
            let entry = inner.devices.get(device)?;
            let present = entry.present;
            inner.next_token += 1;
            let token = inner.next_token;
            inner.users.insert(
                token,
                UserEntry {
                    device: device.to_string(),
                    user: Arc::clone(&user),
                },
            );
            (UserToken(token), present)
        };
        if present {
            user.on_event(device, DeviceEvent::Add);
        }
        Some(token)
    }

    fn remove_user(&self, token: UserToken) {
        self.inner.lock().users.remove(&token.0);
    }

    fn claim(&self, token: UserToken) -> ControllerResult<()> {
        let mut inner = self.inner.lock();
        let device = inner
            .users
            .get(&token.0)
            .map(|u| u.device.clone())
            .ok_or_else(|| ControllerError::NotFound("stale device user".into()))?;
        let entry = inner
            .devices
            .get_mut(&device)
            .ok_or_else(|| ControllerError::NotFound(device.clone()))?;
        entry.claims += 1;
        if entry.claims == 1 {
            entry.link_up = true;
        }
        Ok(())
    }

    fn release(&self, token: UserToken) {
        let mut inner = self.inner.lock();
        let Some(device) = inner.users.get(&token.0).map(|u| u.device.clone()) else {
            return;
        };
        if let Some(entry) = inner.devices.get_mut(&device) {
            entry.claims = entry.claims.saturating_sub(1);
            if entry.claims == 0 {
                entry.link_up = false;
            }
        }
    }

    fn lock(&self) {
        self.inner.lock().lock_hold += 1;
    }

    fn unlock(&self) {
        let mut inner = self.inner.lock();
        inner.lock_hold = inner.lock_hold.saturating_sub(1);
    }

    fn flush_unused(&self) {
        let mut inner = self.inner.lock();
        if inner.lock_hold > 0 {
            return;
        }
        let used: Vec<String> = inner.users.values().map(|u| u.device.clone()).collect();
        inner.devices.retain(|name, entry| {
            entry.kind != DeviceKind::Simple || entry.claims > 0 || used.iter().any(|u| u == name)
        });
    }

    fn broadcast(&self, device: &str, event: DeviceEvent) {
        let users = {
            let inner = self.inner.lock();
            Self::users_of(&inner, device)
        };
        Self::dispatch(users, device, event);
    }

    fn set_link_state(&self, name: &str, up: bool) -> i32 {
        let mut inner = self.inner.lock();
        match inner.devices.get_mut(name) {
            Some(entry) => {
                entry.link_up = up;
                crate::error::status::OK
            }
            None => crate::error::status::NOT_FOUND,
        }
    }

    fn link_state(&self, name: &str) -> bool {
        self.inner
            .lock()
            .devices
            .get(name)
            .map(|d| d.link_up)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        events: PlMutex<Vec<(String, DeviceEvent)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: PlMutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<(String, DeviceEvent)> {
            std::mem::take(&mut self.events.lock())
        }
    }

    impl DeviceUser for Recorder {
        fn on_event(&self, device: &str, event: DeviceEvent) {
            self.events.lock().push((device.to_string(), event));
        }
    }

    #[test]
    fn present_toggle_broadcasts_add_and_remove() {
        let reg = MemoryRegistry::new();
        reg.ensure_simple("eth0");
        let rec = Recorder::new();
        reg.add_user("eth0", rec.clone()).unwrap();

        reg.set_present("eth0", true);
        reg.set_present("eth0", true); // no change, no event
        reg.set_present("eth0", false);

        let events = rec.take();
        assert_eq!(
            events,
            vec![
                ("eth0".to_string(), DeviceEvent::Add),
                ("eth0".to_string(), DeviceEvent::Remove),
            ]
        );
    }

    #[test]
    fn add_user_sees_an_already_present_device() {
        let reg = MemoryRegistry::new();
        reg.ensure_simple("eth0");
        reg.set_present("eth0", true);

        let rec = Recorder::new();
        reg.add_user("eth0", rec.clone()).unwrap();
        assert_eq!(rec.take(), vec![("eth0".to_string(), DeviceEvent::Add)]);
    }

    #[test]
    fn claim_and_release_track_link_state() {
        let reg = MemoryRegistry::new();
        reg.ensure_simple("eth0");
        let rec = Recorder::new();
        let token = reg.add_user("eth0", rec).unwrap();

        reg.claim(token).unwrap();
        assert!(reg.link_state("eth0"));
        reg.claim(token).unwrap();
        reg.release(token);
        assert!(reg.link_state("eth0"));
        reg.release(token);
        assert!(!reg.link_state("eth0"));
    }

    #[test]
    fn lock_suppresses_the_unused_sweep() {
        let reg = MemoryRegistry::new();
        reg.ensure_simple("wlan0");

        reg.lock();
        reg.flush_unused();
        assert_eq!(reg.kind("wlan0"), Some(DeviceKind::Simple));

        reg.unlock();
        reg.flush_unused();
        assert_eq!(reg.kind("wlan0"), None);
    }

    #[test]
    fn external_devices_survive_the_sweep() {
        let reg = MemoryRegistry::new();
        assert!(reg.insert("br0", DeviceKind::ExternalBridge));
        assert!(!reg.insert("br0", DeviceKind::External));
        reg.flush_unused();
        assert_eq!(reg.kind("br0"), Some(DeviceKind::ExternalBridge));
    }
}
