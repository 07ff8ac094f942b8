//! Synchronisation state between the controller and the external handler.
//!
//! Every mutating operation issued to the external handler is asynchronous;
//! confirmation arrives later (possibly never) as an unsolicited
//! notification. Each managed entity therefore carries exactly one
//! [`SyncState`] describing which confirmation, if any, it is waiting for.

/// Outbound method names of the external device handler interface.
pub mod methods {
    pub const CREATE: &str = "create";
    pub const CONFIG_INIT: &str = "config_init";
    pub const RELOAD: &str = "reload";
    pub const DUMP_INFO: &str = "dump_info";
    pub const DUMP_STATS: &str = "dump_stats";
    /// Reserved by the handler interface; never invoked by the controller.
    pub const CHECK_STATE: &str = "check_state";
    pub const FREE: &str = "free";

    // hotplug ops
    pub const ADD: &str = "add";
    pub const REMOVE: &str = "remove";
    pub const PREPARE: &str = "prepare";
}

/// Per-entity sync status. `Synchronized` means the external handler has
/// confirmed the entity's current state; every `Pending*` variant names the
/// outstanding method awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Synchronized,
    PendingCreate,
    PendingReload,
    /// Terminal destruction of the entity is outstanding.
    PendingFree,
    /// Reversible deactivation is outstanding; config and members survive.
    PendingDisable,
    PendingPrepare,
    PendingAdd,
    PendingRemove,
}

impl SyncState {
    /// True for every state other than `Synchronized`.
    pub fn is_pending(self) -> bool {
        self != Self::Synchronized
    }

    /// The outbound method a retry of this state re-invokes, if any.
    ///
    /// Disable retries re-issue `free`: the handler side does not
    /// distinguish the two teardown flavours, only the controller does.
    pub fn method(self) -> Option<&'static str> {
        match self {
            Self::Synchronized => None,
            Self::PendingCreate => Some(methods::CREATE),
            Self::PendingReload => Some(methods::RELOAD),
            Self::PendingFree | Self::PendingDisable => Some(methods::FREE),
            Self::PendingPrepare => Some(methods::PREPARE),
            Self::PendingAdd => Some(methods::ADD),
            Self::PendingRemove => Some(methods::REMOVE),
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Synchronized => "synchronized",
            Self::PendingCreate => "pending-create",
            Self::PendingReload => "pending-reload",
            Self::PendingFree => "pending-free",
            Self::PendingDisable => "pending-disable",
            Self::PendingPrepare => "pending-prepare",
            Self::PendingAdd => "pending-add",
            Self::PendingRemove => "pending-remove",
        };
        f.write_str(name)
    }
}
