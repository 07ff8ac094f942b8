//! Ordered, key-unique value list with update/flush diffing.
//!
//! Bridge members are reconciled against each new configuration the same
//! way the old and new membership of a reloaded bridge is diffed: an update
//! pass marks the existing entries stale, re-inserting a key revives the
//! old entry (keep-old semantics, the duplicate is discarded), and the
//! flush removes whatever stayed stale. Sticky entries — members that
//! arrived through hotplug rather than configuration — are exempt from the
//! sweep.

/// Implemented by the stored values.
pub(crate) trait Keyed {
    fn key(&self) -> &str;
    /// Sticky values survive `begin_update`/`flush` cycles.
    fn sticky(&self) -> bool;
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    stale: bool,
}

/// Outcome of an insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted,
    /// The key existed; the old value was kept and the new one dropped.
    KeptOld,
}

#[derive(Debug, Default)]
pub(crate) struct VList<T: Keyed> {
    slots: Vec<Slot<T>>,
}

impl<T: Keyed> VList<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.slots
            .iter()
            .find(|s| s.value.key() == key)
            .map(|s| &s.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.slots
            .iter_mut()
            .find(|s| s.value.key() == key)
            .map(|s| &mut s.value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.value.key().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.value)
    }

    /// Marks every non-sticky entry stale, to be revived by re-insertion.
    pub fn begin_update(&mut self) {
        for slot in &mut self.slots {
            if !slot.value.sticky() {
                slot.stale = true;
            }
        }
    }

    /// Inserts a value, or revives the existing entry with the same key.
    pub fn insert(&mut self, value: T) -> InsertOutcome {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.value.key() == value.key())
        {
            slot.stale = false;
            return InsertOutcome::KeptOld;
        }
        self.slots.push(Slot { value, stale: false });
        InsertOutcome::Inserted
    }

    /// Removes and returns the entries still stale after the update pass.
    pub fn flush(&mut self) -> Vec<T> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.slots.len());
        for slot in self.slots.drain(..) {
            if slot.stale {
                removed.push(slot.value);
            } else {
                kept.push(slot);
            }
        }
        self.slots = kept;
        removed
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let idx = self.slots.iter().position(|s| s.value.key() == key)?;
        Some(self.slots.remove(idx).value)
    }

    /// Empties the list, returning every value.
    pub fn drain(&mut self) -> Vec<T> {
        self.slots.drain(..).map(|s| s.value).collect()
    }
}
