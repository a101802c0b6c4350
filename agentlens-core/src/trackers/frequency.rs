//! Capped frequency counter with least-recently-touched eviction
//!
//! The recency order is an explicit structure (order vector + hash index),
//! with `touch` and `evict_oldest` as first-class operations. Capacity is
//! fixed at construction; inserting a brand-new key at capacity evicts the
//! least recently touched entry first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One tracked key with its count and observation bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub key: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Frequency counter bounded at `capacity` entries.
#[derive(Debug, Clone)]
pub struct FrequencyTracker {
    capacity: usize,
    entries: HashMap<String, FrequencyEntry>,
    /// Recency order: front = least recently touched, back = most recent
    order: Vec<String>,
}

impl FrequencyTracker {
    /// Create a tracker holding at most `capacity` keys.
    ///
    /// A zero capacity is treated as 1 so the tracker stays usable.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Record one occurrence of `key` at `timestamp`.
    ///
    /// Always moves the key to the most-recently-touched position. When a
    /// brand-new key arrives at capacity, the least recently touched entry
    /// is evicted first.
    pub fn increment(&mut self, key: &str, timestamp: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.count += 1;
            entry.last_seen = timestamp;
            self.touch(key);
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key.to_string(),
            FrequencyEntry {
                key: key.to_string(),
                count: 1,
                first_seen: timestamp,
                last_seen: timestamp,
            },
        );
        self.order.push(key.to_string());
    }

    /// Move `key` to the most-recently-touched position.
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    /// Remove and return the least recently touched entry.
    fn evict_oldest(&mut self) -> Option<FrequencyEntry> {
        if self.order.is_empty() {
            return None;
        }
        let key = self.order.remove(0);
        self.entries.remove(&key)
    }

    /// Count recorded for `key`; 0 when the key is absent or was evicted.
    pub fn get_count(&self, key: &str) -> u64 {
        self.entries.get(key).map(|e| e.count).unwrap_or(0)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `n` entries sorted by count descending.
    ///
    /// Ties are broken by recency (most recently touched first); the order
    /// is stable across calls with no intervening writes.
    pub fn top_n(&self, n: usize) -> Vec<FrequencyEntry> {
        let mut entries: Vec<FrequencyEntry> = self
            .order
            .iter()
            .rev()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        entries.truncate(n);
        entries
    }

    /// Serialize to `(key, count, first_seen, last_seen)` tuples, least
    /// recently touched first.
    pub fn serialize(&self) -> Vec<(String, u64, DateTime<Utc>, DateTime<Utc>)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .map(|e| (e.key.clone(), e.count, e.first_seen, e.last_seen))
            .collect()
    }

    /// Restore from the tuples produced by [`serialize`](Self::serialize).
    ///
    /// Entries beyond capacity are dropped oldest-first.
    pub fn restore(
        capacity: usize,
        state: Vec<(String, u64, DateTime<Utc>, DateTime<Utc>)>,
    ) -> Self {
        let mut tracker = Self::new(capacity);
        for (key, count, first_seen, last_seen) in state {
            if tracker.entries.len() >= tracker.capacity {
                tracker.evict_oldest();
            }
            tracker.order.push(key.clone());
            tracker.entries.insert(
                key.clone(),
                FrequencyEntry {
                    key,
                    count,
                    first_seen,
                    last_seen,
                },
            );
        }
        tracker
    }
}
