//! Retry slots and timers.
//!
//! Confirmations from the external handler are best-effort; the recovery
//! mechanism is a bounded re-invocation of the outstanding method. Each
//! managed entity owns one [`RetrySlot`] combining its sync state, the
//! attempt counter and the single-shot timer. The transition logic is kept
//! free of I/O so it can be exercised without a runtime: [`RetrySlot::tick`]
//! only reports what should happen, the controller performs it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use extdev_core::SyncState;

use crate::controller::Controller;

/// How long to wait for a confirmation notification.
pub const TIMEOUT_MS: u64 = 1000;

/// Upper bound on re-invocations of one outstanding method.
pub const MAX_RETRIES: u8 = 3;

/// Addresses the entity a timer belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntityKey {
    Device(String),
    Member { bridge: String, member: String },
}

/// Cancellation handle for one armed retry timer.
#[derive(Debug)]
pub(crate) struct RetryTimer {
    token: CancellationToken,
}

impl RetryTimer {
    fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Arms a single-shot timer that re-enters the controller through
/// `retry_tick`. Must be called from within the runtime.
pub(crate) fn arm_timer(controller: &Controller, key: EntityKey, ms: u64) -> RetryTimer {
    let token = CancellationToken::new();
    let guard = token.clone();
    let controller = controller.clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = guard.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                trace!(?key, "retry timer fired");
                controller.retry_tick(key);
            }
        }
    });
    RetryTimer { token }
}

/// What a timer expiry asks the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
    /// Nothing outstanding.
    Idle,
    /// Re-invoke the pending method and re-arm.
    Retry { method: &'static str },
    /// Attempt budget exhausted: log critical once and stop.
    GiveUp { method: &'static str },
}

/// Sync state, attempt counter and timer of one managed entity.
#[derive(Debug, Default)]
pub(crate) struct RetrySlot {
    pub state: SyncState,
    pub attempts: u8,
    timer: Option<RetryTimer>,
}

impl RetrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A configured bridge member starts out waiting for its `add`; no
    /// timer is armed until the invocation actually goes out.
    pub fn pending_add() -> Self {
        Self {
            state: SyncState::PendingAdd,
            attempts: 0,
            timer: None,
        }
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Starts a new outstanding operation: fresh attempt budget, armed
    /// timer. Any previous timer is cancelled by the replacement.
    pub fn begin(&mut self, state: SyncState, timer: RetryTimer) {
        self.state = state;
        self.attempts = 0;
        self.timer = Some(timer);
    }

    /// Re-arms the timer without touching state or attempts.
    pub fn rearm(&mut self, timer: RetryTimer) {
        self.timer = Some(timer);
    }

    /// Confirms the outstanding operation if it matches. Cancels the timer
    /// and resets the attempt counter. Returns false (and changes nothing)
    /// when the entity is not waiting for this confirmation, which makes
    /// duplicate notifications harmless.
    pub fn confirm(&mut self, expected: SyncState) -> bool {
        if self.state != expected {
            return false;
        }
        self.state = SyncState::Synchronized;
        self.attempts = 0;
        self.timer = None;
        true
    }

    /// Timer expiry. The timer slot is cleared; the caller re-arms on
    /// [`TickAction::Retry`].
    pub fn tick(&mut self) -> TickAction {
        self.timer = None;
        let Some(method) = self.state.method() else {
            return TickAction::Idle;
        };
        if self.attempts >= MAX_RETRIES {
            return TickAction::GiveUp { method };
        }
        self.attempts += 1;
        TickAction::Retry { method }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extdev_core::methods;

    fn pending_create() -> RetrySlot {
        let mut slot = RetrySlot::new();
        slot.state = SyncState::PendingCreate;
        slot
    }

    #[test]
    fn tick_retries_then_gives_up() {
        let mut slot = pending_create();
        for attempt in 1..=MAX_RETRIES {
            assert_eq!(
                slot.tick(),
                TickAction::Retry {
                    method: methods::CREATE
                }
            );
            assert_eq!(slot.attempts, attempt);
        }
        // one tick past the budget quarantines the entity
        assert_eq!(
            slot.tick(),
            TickAction::GiveUp {
                method: methods::CREATE
            }
        );
        assert_eq!(slot.attempts, MAX_RETRIES);
        assert!(!slot.timer_armed());

        // quarantine is stable
        assert!(matches!(slot.tick(), TickAction::GiveUp { .. }));
    }

    #[test]
    fn confirm_resets_the_slot() {
        let mut slot = pending_create();
        slot.attempts = 2;
        assert!(slot.confirm(SyncState::PendingCreate));
        assert_eq!(slot.state, SyncState::Synchronized);
        assert_eq!(slot.attempts, 0);
        assert!(!slot.timer_armed());
    }

    #[test]
    fn mismatched_confirm_changes_nothing() {
        let mut slot = pending_create();
        slot.attempts = 1;
        assert!(!slot.confirm(SyncState::PendingReload));
        assert_eq!(slot.state, SyncState::PendingCreate);
        assert_eq!(slot.attempts, 1);
    }

    #[test]
    fn synchronized_tick_is_idle() {
        let mut slot = RetrySlot::new();
        assert_eq!(slot.tick(), TickAction::Idle);
    }
}
