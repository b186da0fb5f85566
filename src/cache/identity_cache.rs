use std::collections::VecDeque;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::debug;

/// Bounded map with two independent orderings.
///
/// * Access order (kept by the `LruCache`): capacity eviction drops the least
///   recently *accessed* key. Only [`IdentityCache::get_values`] counts as an
///   access.
/// * Load order (a `VecDeque` of key/timestamp pairs): used for age checks.
///   Refreshing a value never resets its load timestamp.
///
/// Every public operation runs under one mutex, so the map and both sequences
/// change together. The cache never fails; a poisoned lock is recovered.
pub struct IdentityCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    max_age: Duration,
    max_items: usize,
}

struct CacheState<K, V> {
    entries: LruCache<K, V>,
    load_order: VecDeque<(K, DateTime<Utc>)>,
}

impl<K, V> CacheState<K, V>
where
    K: Hash + Eq,
{
    fn forget_load(&mut self, key: &K) {
        if let Some(pos) = self.load_order.iter().position(|(k, _)| k == key) {
            self.load_order.remove(pos);
        }
    }
}

impl<K, V> IdentityCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Creates a cache. `max_items == 0` means no capacity bound.
    pub fn new(max_age: Duration, max_items: usize) -> Self {
        let entries = match NonZeroUsize::new(max_items) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            state: Mutex::new(CacheState {
                entries,
                load_order: VecDeque::new(),
            }),
            max_age,
            max_items,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Inserts `value`, or merges it into the existing entry.
    ///
    /// A merge leaves the key's position in both orderings alone. A new key
    /// goes to the back of both; if that overflows capacity the least recently
    /// accessed entry is evicted.
    pub fn add_or_update<F>(&self, key: K, value: V, merge: F)
    where
        F: FnOnce(&V, V) -> V,
    {
        let mut state = self.state();

        if let Some(existing) = state.entries.peek_mut(&key) {
            let merged = merge(existing, value);
            *existing = merged;
            debug!(key = ?key, "identity cache refresh");
            return;
        }

        state.load_order.push_back((key.clone(), Utc::now()));
        if let Some((evicted, _)) = state.entries.push(key, value) {
            state.forget_load(&evicted);
            debug!(key = ?evicted, "identity cache eviction");
        }
    }

    /// Returns the stored value and marks the key most recently used.
    pub fn get_values(&self, key: &K) -> Option<V> {
        self.state().entries.get(key).cloned()
    }

    /// Existence and freshness check. Does not count as an access.
    ///
    /// An entry older than `max_age` is removed here and reported absent.
    pub fn contains_key(&self, key: &K) -> bool {
        let mut state = self.state();
        if !state.entries.contains(key) {
            return false;
        }

        let loaded_at = state
            .load_order
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, at)| *at);

        let expired = loaded_at.is_some_and(|at| {
            Utc::now()
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|age| age > self.max_age)
        });

        if expired {
            state.entries.pop(key);
            state.forget_load(key);
            debug!(key = ?key, "identity cache expiry");
            return false;
        }
        true
    }

    pub fn remove_item_by_key(&self, key: &K) -> Option<V> {
        let mut state = self.state();
        let removed = state.entries.pop(key);
        state.forget_load(key);
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.load_order.clear();
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently accessed.
    pub fn access_order(&self) -> Vec<K> {
        let state = self.state();
        let mut keys: Vec<K> = state.entries.iter().map(|(k, _)| k.clone()).collect();
        keys.reverse();
        keys
    }

    /// Keys from oldest to newest load.
    pub fn load_order(&self) -> Vec<K> {
        self.state().load_order.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn loaded_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.state()
            .load_order
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, at)| *at)
    }

    /// Overrides a key's load timestamp, e.g. to age an entry. Returns `false`
    /// when the key is not cached.
    pub fn set_loaded_at(&self, key: &K, at: DateTime<Utc>) -> bool {
        let mut state = self.state();
        match state.load_order.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => {
                entry.1 = at;
                true
            }
            None => false,
        }
    }
}

impl<K, V> std::fmt::Debug for IdentityCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("max_age", &self.max_age)
            .field("max_items", &self.max_items)
            .finish_non_exhaustive()
    }
}
