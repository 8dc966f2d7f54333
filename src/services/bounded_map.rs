//! Fixed-capacity map with insertion-order eviction.
//!
//! Backs the agent and task stores: when full, the oldest eligible entry is
//! evicted to make room. Eligibility is caller-defined, so the task store
//! can refuse to evict work that is still in flight.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

/// A `HashMap` bounded to `capacity` entries, tracking insertion order.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Insert without eviction. Updating an existing key keeps its original
    /// insertion position. Returns `false` when the map is full and the key
    /// is new.
    pub fn try_insert(&mut self, key: K, value: V) -> bool {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, value);
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        true
    }

    /// Insert, evicting the oldest entry for which `evictable` returns true
    /// when the map is full. Returns the evicted pair, or the rejected
    /// insertion when nothing can be evicted.
    pub fn insert_or_evict<F>(
        &mut self,
        key: K,
        value: V,
        evictable: F,
    ) -> Result<Option<(K, V)>, (K, V)>
    where
        F: Fn(&K, &V) -> bool,
    {
        if self.contains_key(&key) || !self.is_full() {
            self.try_insert(key, value);
            return Ok(None);
        }

        // Full with a new key: find the oldest evictable entry.
        let victim = self
            .order
            .iter()
            .find(|k| self.entries.get(k).is_some_and(|v| evictable(k, v)))
            .cloned();

        let Some(victim) = victim else {
            return Err((key, value));
        };

        let evicted_value = self.remove(&victim);
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        // remove() always succeeds for a key taken from `order`
        Ok(evicted_value.map(|v| (victim, v)))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(value)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Remove every entry matching the predicate, returning the removed keys.
    pub fn retain_collect<F>(&mut self, mut keep: F) -> Vec<K>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let removed: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &removed {
            self.remove(key);
        }
        removed
    }
}
