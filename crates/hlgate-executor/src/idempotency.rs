//! Time-windowed deduplication of intent ids.
//!
//! An id is a duplicate for `window_secs` after it was first seen. A hit
//! moves the entry to most-recently-used but does not restart its TTL, so
//! an id repeated forever still expires one window after first sight.
//! When the cache exceeds `max_size`, the least-recently-used entry goes.

use std::collections::{BTreeMap, HashMap, VecDeque};

use hlgate_core::now_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Idempotency cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_size() -> usize {
    1000
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_size: default_max_size(),
        }
    }
}

/// What the cache remembers about one intent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Snapshot of the payload from the first submission.
    pub payload: serde_json::Value,
    pub first_seen_ms: u64,
    /// Insertion sequence number; lower was inserted earlier.
    pub sequence: u64,
}

#[derive(Debug)]
struct Entry {
    record: IdempotencyRecord,
    /// Key into `CacheState::recency`.
    recency: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    /// Recency order: lowest key is least recently used.
    recency: BTreeMap<u64, String>,
    /// Insertion order for TTL purge: (first_seen_ms, sequence, id).
    /// May hold stale items for ids already evicted.
    by_age: VecDeque<(u64, u64, String)>,
    next_seq: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn purge_expired(&mut self, now_ms: u64, window_ms: u64) -> usize {
        let mut purged = 0;
        loop {
            let Some((first_seen, seq)) = self.by_age.front().map(|(f, s, _)| (*f, *s)) else {
                break;
            };
            if now_ms.saturating_sub(first_seen) < window_ms {
                break;
            }
            let Some((_, _, id)) = self.by_age.pop_front() else {
                break;
            };
            let live = self
                .entries
                .get(&id)
                .is_some_and(|e| e.record.sequence == seq);
            if live {
                if let Some(entry) = self.entries.remove(&id) {
                    self.recency.remove(&entry.recency);
                    purged += 1;
                }
            }
        }
        purged
    }

    fn touch(&mut self, id: &str) {
        let recency = self.bump();
        if let Some(entry) = self.entries.get_mut(id) {
            self.recency.remove(&entry.recency);
            entry.recency = recency;
            self.recency.insert(recency, id.to_string());
        }
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, id) = self.recency.pop_first()?;
        self.entries.remove(&id);
        Some(id)
    }
}

/// Bounded, time-windowed set of seen intent ids.
///
/// Thread-safe: purge, lookup and insert run as one critical section, so two
/// concurrent callers with the same id never both see it as new.
#[derive(Debug)]
pub struct IdempotencyCache {
    window_ms: u64,
    max_size: usize,
    state: Mutex<CacheState>,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            window_ms: config.window_secs * 1000,
            max_size: config.max_size.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns true if `id` was already seen within the window; otherwise
    /// stores it and returns false.
    pub fn check_and_store(&self, id: &str, payload: serde_json::Value) -> bool {
        self.check_and_store_at(id, payload, now_ms())
    }

    /// `check_and_store` at a given time (for testing).
    pub fn check_and_store_at(&self, id: &str, payload: serde_json::Value, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        let purged = state.purge_expired(now_ms, self.window_ms);
        if purged > 0 {
            debug!(purged, "Purged expired idempotency entries");
        }

        if state.entries.contains_key(id) {
            state.touch(id);
            debug!(intent_id = %id, "Duplicate intent within idempotency window");
            return true;
        }

        let sequence = state.bump();
        state.entries.insert(
            id.to_string(),
            Entry {
                record: IdempotencyRecord {
                    payload,
                    first_seen_ms: now_ms,
                    sequence,
                },
                recency: sequence,
            },
        );
        state.recency.insert(sequence, id.to_string());
        state.by_age.push_back((now_ms, sequence, id.to_string()));

        if state.entries.len() > self.max_size {
            if let Some(evicted) = state.evict_lru() {
                debug!(evicted = %evicted, "Idempotency cache full, evicted LRU entry");
            }
        }
        false
    }

    /// Look up a live record. A hit refreshes its recency.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<IdempotencyRecord> {
        self.get_at(id, now_ms())
    }

    /// `get` at a given time (for testing).
    #[must_use]
    pub fn get_at(&self, id: &str, now_ms: u64) -> Option<IdempotencyRecord> {
        let mut state = self.state.lock();
        state.purge_expired(now_ms, self.window_ms);
        let record = state.entries.get(id).map(|e| e.record.clone())?;
        state.touch(id);
        Some(record)
    }

    /// Number of live entries (expired entries are purged lazily).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const T0: u64 = 1_700_000_000_000;

    fn cache(window_secs: u64, max_size: usize) -> IdempotencyCache {
        IdempotencyCache::new(IdempotencyConfig {
            window_secs,
            max_size,
        })
    }

    #[test]
    fn test_new_then_duplicate() {
        let c = cache(60, 1000);
        assert!(!c.check_and_store_at("a", json!({"n": 1}), T0));
        assert!(c.check_and_store_at("a", json!({"n": 2}), T0 + 1));
        assert!(c.check_and_store_at("a", json!({"n": 3}), T0 + 59_999));
        // First payload is kept
        assert_eq!(c.get_at("a", T0 + 2).unwrap().payload, json!({"n": 1}));
    }

    #[test]
    fn test_expires_after_window_from_first_seen() {
        let c = cache(60, 1000);
        assert!(!c.check_and_store_at("a", json!(null), T0));
        // Hits do not extend the TTL
        assert!(c.check_and_store_at("a", json!(null), T0 + 30_000));
        assert!(c.check_and_store_at("a", json!(null), T0 + 50_000));
        assert!(!c.check_and_store_at("a", json!(null), T0 + 60_000));
        assert_eq!(c.get_at("a", T0 + 60_001).unwrap().first_seen_ms, T0 + 60_000);
    }

    #[test]
    fn test_get_miss() {
        let c = cache(60, 1000);
        assert!(c.get_at("missing", T0).is_none());
        c.check_and_store_at("a", json!(null), T0);
        assert!(c.get_at("a", T0 + 60_000).is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let c = cache(60, 3);
        c.check_and_store_at("a", json!(null), T0);
        c.check_and_store_at("b", json!(null), T0 + 1);
        c.check_and_store_at("c", json!(null), T0 + 2);
        // Touch "a" so "b" becomes least recently used
        assert!(c.check_and_store_at("a", json!(null), T0 + 3));
        assert!(!c.check_and_store_at("d", json!(null), T0 + 4));

        assert_eq!(c.len(), 3);
        assert!(c.get_at("b", T0 + 5).is_none());
        assert!(c.get_at("a", T0 + 5).is_some());
        assert!(c.get_at("c", T0 + 5).is_some());
        assert!(c.get_at("d", T0 + 5).is_some());
    }

    #[test]
    fn test_evicted_id_is_new_again() {
        let c = cache(60, 1);
        c.check_and_store_at("a", json!(null), T0);
        c.check_and_store_at("b", json!(null), T0 + 1);
        assert!(!c.check_and_store_at("a", json!(null), T0 + 2));
    }

    #[test]
    fn test_stale_age_entries_do_not_purge_reinserted_id() {
        let c = cache(60, 1);
        c.check_and_store_at("a", json!(null), T0);
        c.check_and_store_at("b", json!(null), T0 + 1);
        // "a" re-enters later; its old age entry must not remove it
        c.check_and_store_at("a", json!(null), T0 + 30_000);
        assert!(c.check_and_store_at("a", json!(null), T0 + 60_500));
    }

    #[test]
    fn test_concurrent_callers_see_new_once() {
        let c = Arc::new(cache(60, 1000));
        let new_count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                let new_count = Arc::clone(&new_count);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        if !c.check_and_store(&format!("id-{i}"), json!(null)) {
                            new_count.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(new_count.load(Ordering::SeqCst), 100);
    }
}
