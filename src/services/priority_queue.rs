//! Index-backed binary min-heap keyed by item id.
//!
//! A plain `BinaryHeap` cannot change an item's priority in place; this
//! queue keeps a position index alongside the heap array so `update` and
//! `remove` run in O(log n) rather than requiring a rebuild.
//!
//! Items with equal priority pop in no particular order.

use std::collections::HashMap;
use std::hash::Hash;

/// Min-heap priority queue with O(log n) update and removal by key.
///
/// Lower priority values pop first. Callers that want "higher number wins"
/// semantics negate the priority on insertion.
#[derive(Debug, Clone)]
pub struct PriorityQueue<K, P> {
    /// Heap array of (key, priority), min-heap ordered by priority.
    heap: Vec<(K, P)>,
    /// key -> current index in `heap`.
    positions: HashMap<K, usize>,
}

impl<K, P> Default for PriorityQueue<K, P>
where
    K: Hash + Eq + Clone,
    P: Ord + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> PriorityQueue<K, P>
where
    K: Hash + Eq + Clone,
    P: Ord + Copy,
{
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    /// Current priority of the given key, if present.
    pub fn priority_of(&self, key: &K) -> Option<P> {
        self.positions.get(key).map(|&i| self.heap[i].1)
    }

    /// Insert a key with a priority, or update it in place if already queued.
    pub fn push(&mut self, key: K, priority: P) {
        if let Some(&index) = self.positions.get(&key) {
            let old = self.heap[index].1;
            self.heap[index].1 = priority;
            if priority < old {
                self.sift_up(index);
            } else if priority > old {
                self.sift_down(index);
            }
            return;
        }

        let index = self.heap.len();
        self.positions.insert(key.clone(), index);
        self.heap.push((key, priority));
        self.sift_up(index);
    }

    /// The minimum-priority entry without removing it.
    pub fn peek(&self) -> Option<(&K, P)> {
        self.heap.first().map(|(k, p)| (k, *p))
    }

    /// Remove and return the minimum-priority entry.
    pub fn pop(&mut self) -> Option<(K, P)> {
        if self.heap.is_empty() {
            return None;
        }

        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        self.sync_position(0);

        let (key, priority) = self.heap.pop()?;
        self.positions.remove(&key);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some((key, priority))
    }

    /// Remove an arbitrary key, returning its priority if it was queued.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        let index = self.positions.remove(key)?;
        let last = self.heap.len() - 1;

        if index == last {
            let (_, priority) = self.heap.pop()?;
            return Some(priority);
        }

        self.heap.swap(index, last);
        self.sync_position(index);
        let (_, removed_priority) = self.heap.pop()?;

        // The swapped-in entry may violate heap order in either direction.
        let moved = self.heap[index].1;
        if moved < removed_priority {
            self.sift_up(index);
        } else {
            self.sift_down(index);
        }
        Some(removed_priority)
    }

    /// Change the priority of a queued key. Returns the old priority, or
    /// `None` when the key is not queued.
    pub fn update(&mut self, key: &K, priority: P) -> Option<P> {
        let &index = self.positions.get(key)?;
        let old = self.heap[index].1;
        self.heap[index].1 = priority;
        if priority < old {
            self.sift_up(index);
        } else if priority > old {
            self.sift_down(index);
        }
        Some(old)
    }

    /// Iterate over queued entries in heap (not priority) order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, P)> {
        self.heap.iter().map(|(k, p)| (k, *p))
    }

    /// Snapshot of the queue sorted ascending by priority. The queue itself
    /// is left untouched.
    pub fn to_sorted_vec(&self) -> Vec<(K, P)> {
        let mut snapshot = self.clone();
        let mut sorted = Vec::with_capacity(snapshot.heap.len());
        while let Some(entry) = snapshot.pop() {
            sorted.push(entry);
        }
        sorted
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }

    fn sync_position(&mut self, index: usize) {
        let key = self.heap[index].0.clone();
        self.positions.insert(key, index);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index].1 >= self.heap[parent].1 {
                break;
            }
            self.heap.swap(index, parent);
            self.sync_position(index);
            index = parent;
        }
        self.sync_position(index);
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.heap[left].1 < self.heap[smallest].1 {
                smallest = left;
            }
            if right < len && self.heap[right].1 < self.heap[smallest].1 {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.heap.swap(index, smallest);
            self.sync_position(index);
            index = smallest;
        }
        self.sync_position(index);
    }
}
