use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Process-local read-through cache with a fixed TTL per entry, measured from
/// insertion. Expired entries are treated as absent and evicted lazily on
/// lookup. Purely an optimization: every mutation path invalidates its key
/// before returning, and a miss recomputes from source data.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: DashMap<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        // The shard guard must drop before the remove below.
        match self.entries.get(key) {
            Some(entry) => {
                let (inserted_at, value) = entry.value();
                if inserted_at.elapsed() < self.ttl {
                    return Some(value.clone());
                }
            }
            None => return None,
        }
        self.entries.remove(key);
        None
    }

    pub fn set(&self, key: String, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}
