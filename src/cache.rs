use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant}
};

/// Default number of entries kept before expired ones are swept.
pub const DEFAULT_CAPACITY: usize = 1000;

struct Entry<V> {
    value:      V,
    expires_at: Instant
}

/// Thread-safe map whose entries expire a fixed time after insertion.
///
/// Readers share the lock; a miss never blocks other readers while the caller
/// computes the value. Two callers missing on the same key may both compute
/// and insert it, the later insert wins.
pub struct TtlCache<V> {
    entries:  RwLock<HashMap<String, Entry<V>>>,
    ttl:      Duration,
    capacity: usize
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`, if any
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let now = Instant::now();
        if entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        // Still full of live entries: drop half of them
        if entries.len() >= self.capacity {
            let keys: Vec<_> = entries.keys().take(self.capacity / 2 + 1).cloned().collect();
            for key in keys {
                entries.remove(&key);
            }
        }
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: now + self.ttl
            }
        );
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
