//! Bounded-retention in-memory store with an injected clock.
//!
//! Used for run progress and uncommitted preview plans. Entries live for a
//! fixed TTL after their last write; expired entries read as absent and are
//! removed by [`EphemeralStore::sweep`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + offset
    }
}

struct Slot<V> {
    written_at: Instant,
    value: V,
}

pub struct EphemeralStore<K, V> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> EphemeralStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store using the wall clock.
    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, slot: &Slot<V>, now: Instant) -> bool {
        now.saturating_duration_since(slot.written_at) < self.ttl
    }

    /// Insert or replace, restarting the entry's retention window.
    pub fn insert(&self, key: K, value: V) {
        let written_at = self.clock.now();
        self.lock().insert(key, Slot { written_at, value });
    }

    /// Live value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.lock();
        entries
            .get(key)
            .filter(|slot| self.is_live(slot, now))
            .map(|slot| slot.value.clone())
    }

    /// Remove and return the live value for `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let slot = self.lock().remove(key)?;
        if self.is_live(&slot, now) {
            Some(slot.value)
        } else {
            None
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, slot| now.saturating_duration_since(slot.written_at) < ttl);
        before - entries.len()
    }

    /// Number of held entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_secs: u64) -> (Arc<ManualClock>, EphemeralStore<&'static str, u32>) {
        let clock = Arc::new(ManualClock::new());
        let store = EphemeralStore::new(Duration::from_secs(ttl_secs), clock.clone());
        (clock, store)
    }

    #[test]
    fn test_get_returns_live_value() {
        let (_clock, store) = store(60);
        store.insert("a", 1);
        assert_eq!(store.get(&"a"), Some(1));
        assert_eq!(store.get(&"missing"), None);
    }

    #[test]
    fn test_expired_reads_as_absent_but_is_not_removed() {
        let (clock, store) = store(60);
        store.insert("a", 1);
        clock.advance(Duration::from_secs(60));
        assert_eq!(store.get(&"a"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_restarts_retention() {
        let (clock, store) = store(60);
        store.insert("a", 1);
        clock.advance(Duration::from_secs(45));
        store.insert("a", 2);
        clock.advance(Duration::from_secs(45));
        assert_eq!(store.get(&"a"), Some(2));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, store) = store(60);
        store.insert("old", 1);
        clock.advance(Duration::from_secs(30));
        store.insert("new", 2);
        clock.advance(Duration::from_secs(31));

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"new"), Some(2));
    }

    #[test]
    fn test_remove_expired_returns_none() {
        let (clock, store) = store(10);
        store.insert("a", 1);
        clock.advance(Duration::from_secs(11));
        assert_eq!(store.remove(&"a"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_live_returns_value() {
        let (_clock, store) = store(10);
        store.insert("a", 7);
        assert_eq!(store.remove(&"a"), Some(7));
        assert_eq!(store.get(&"a"), None);
    }
}
