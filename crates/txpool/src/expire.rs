//! Multi-group expiry queue.
//!
//! Time-bucketed: a ring of per-second key sets plus a map from key to its
//! bucket, no timer per item. Keys climb through the groups (60 s, 600 s,
//! 3600 s by default); each expiry surfaces the item once for rebroadcast
//! and eviction happens when the last group expires.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

/// An item surfaced by a group expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiredItem<K, V> {
    /// The interval of the group that just expired.
    pub interval: Duration,
    pub key: K,
    pub value: V,
    /// True when the item left the last group and was evicted.
    pub is_last: bool,
}

struct ItemState {
    group: usize,
    expires_at: Duration,
}

/// A tick-driven expiry queue. The owner advances it with
/// [`ExpireQueue::pop_expired`] on its timer; nothing here reads clocks.
pub struct ExpireQueue<K: Eq + Hash + Clone, V: Clone> {
    intervals: Vec<Duration>,
    items: HashMap<K, ItemState>,
    values: HashMap<K, V>,
    /// expiry instant (whole seconds) → keys due then.
    buckets: BTreeMap<u64, HashSet<K>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpireQueue<K, V> {
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            items: HashMap::new(),
            values: HashMap::new(),
            buckets: BTreeMap::new(),
        }
    }

    /// Append an expiry group. Groups are traversed in insertion order.
    pub fn add_group(&mut self, interval: Duration) {
        self.intervals.push(interval);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn schedule(&mut self, key: K, group: usize, now: Duration) {
        let expires_at = now + self.intervals[group];
        self.buckets
            .entry(expires_at.as_secs())
            .or_default()
            .insert(key.clone());
        self.items.insert(key, ItemState { group, expires_at });
    }

    /// Insert a key into the first group. Re-pushing an existing key resets
    /// it to the first group.
    pub fn push(&mut self, key: K, value: V, now: Duration) {
        if self.intervals.is_empty() {
            return;
        }
        self.remove(&key);
        self.values.insert(key.clone(), value);
        self.schedule(key, 0, now);
    }

    /// Remove a key (block inclusion beats expiry).
    pub fn remove(&mut self, key: &K) {
        if let Some(state) = self.items.remove(key) {
            if let Some(bucket) = self.buckets.get_mut(&state.expires_at.as_secs()) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.buckets.remove(&state.expires_at.as_secs());
                }
            }
        }
        self.values.remove(key);
    }

    /// Drain every item due at or before `now`.
    ///
    /// Items in a non-final group climb to the next one and are returned
    /// with `is_last = false`; items leaving the final group are evicted and
    /// returned with `is_last = true`.
    pub fn pop_expired(&mut self, now: Duration) -> Vec<ExpiredItem<K, V>> {
        let mut expired = Vec::new();
        let due: Vec<u64> = self
            .buckets
            .range(..=now.as_secs())
            .map(|(secs, _)| *secs)
            .collect();
        for secs in due {
            let Some(keys) = self.buckets.remove(&secs) else {
                continue;
            };
            for key in keys {
                let Some(state) = self.items.remove(&key) else {
                    continue;
                };
                let interval = self.intervals[state.group];
                let is_last = state.group + 1 >= self.intervals.len();
                if is_last {
                    if let Some(value) = self.values.remove(&key) {
                        expired.push(ExpiredItem {
                            interval,
                            key,
                            value,
                            is_last,
                        });
                    }
                } else {
                    let Some(value) = self.values.get(&key).cloned() else {
                        continue;
                    };
                    self.schedule(key.clone(), state.group + 1, now);
                    expired.push(ExpiredItem {
                        interval,
                        key,
                        value,
                        is_last,
                    });
                }
            }
        }
        expired
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for ExpireQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> ExpireQueue<u32, &'static str> {
        let mut q = ExpireQueue::new();
        q.add_group(Duration::from_secs(60));
        q.add_group(Duration::from_secs(600));
        q.add_group(Duration::from_secs(3600));
        q
    }

    #[test]
    fn climbs_groups_then_evicts() {
        let mut q = queue();
        q.push(1, "tx", Duration::ZERO);

        assert!(q.pop_expired(Duration::from_secs(59)).is_empty());

        let first = q.pop_expired(Duration::from_secs(60));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].interval, Duration::from_secs(60));
        assert!(!first[0].is_last);
        assert_eq!(q.len(), 1);

        let second = q.pop_expired(Duration::from_secs(60 + 600));
        assert_eq!(second.len(), 1);
        assert!(!second[0].is_last);

        let third = q.pop_expired(Duration::from_secs(60 + 600 + 3600));
        assert_eq!(third.len(), 1);
        assert!(third[0].is_last);
        assert!(q.is_empty());
    }

    #[test]
    fn remove_cancels_expiry() {
        let mut q = queue();
        q.push(1, "tx", Duration::ZERO);
        q.remove(&1);
        assert!(q.pop_expired(Duration::from_secs(7200)).is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn repush_resets_to_first_group() {
        let mut q = queue();
        q.push(1, "tx", Duration::ZERO);
        q.pop_expired(Duration::from_secs(60));
        // Now in the 600 s group; re-push resets it.
        q.push(1, "tx", Duration::from_secs(60));
        let expired = q.pop_expired(Duration::from_secs(120));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].interval, Duration::from_secs(60));
    }

    #[test]
    fn many_items_share_buckets() {
        let mut q = queue();
        for i in 0..100 {
            q.push(i, "tx", Duration::ZERO);
        }
        let expired = q.pop_expired(Duration::from_secs(60));
        assert_eq!(expired.len(), 100);
    }
}
