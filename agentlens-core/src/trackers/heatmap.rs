//! Rolling per-minute activity heatmap
//!
//! Timestamps are truncated to minute resolution. The tracker holds at most
//! `window_size` minutes of history; anything older than
//! `latest_minute - window_size` is pruned on every write.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One minute of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapBucket {
    /// Start of the minute this bucket covers
    pub minute_timestamp: DateTime<Utc>,
    pub count: u64,
}

/// Rolling window of one-minute activity buckets.
#[derive(Debug, Clone)]
pub struct HeatmapTracker {
    window_size: usize,
    /// Minutes since the Unix epoch → event count
    buckets: BTreeMap<i64, u64>,
    latest_minute: Option<i64>,
}

impl HeatmapTracker {
    /// Create a tracker with a rolling window of `window_size` minutes.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            buckets: BTreeMap::new(),
            latest_minute: None,
        }
    }

    /// Record one event at `timestamp`.
    ///
    /// Pre-epoch timestamps are invalid and silently ignored. Out-of-order
    /// timestamps within the current window still count; anything older than
    /// the window is dropped by the prune.
    pub fn record(&mut self, timestamp: DateTime<Utc>) {
        let secs = timestamp.timestamp();
        if secs < 0 {
            return;
        }
        let minute = secs / 60;

        *self.buckets.entry(minute).or_insert(0) += 1;
        self.latest_minute = Some(self.latest_minute.map_or(minute, |m| m.max(minute)));
        self.prune();
    }

    /// Drop buckets older than `latest_minute - window_size`.
    fn prune(&mut self) {
        if let Some(latest) = self.latest_minute {
            let cutoff = latest - self.window_size as i64;
            self.buckets = self.buckets.split_off(&(cutoff + 1));
        }
    }

    /// A contiguous run of `window_size` buckets ending at the latest
    /// recorded minute, with zero-filled gaps.
    ///
    /// Returns an empty vector when nothing has ever been recorded.
    pub fn get_buckets(&self) -> Vec<HeatmapBucket> {
        let Some(latest) = self.latest_minute else {
            return Vec::new();
        };

        let start = latest - self.window_size as i64 + 1;
        (start..=latest)
            .map(|minute| HeatmapBucket {
                minute_timestamp: Utc
                    .timestamp_opt(minute * 60, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                count: self.buckets.get(&minute).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Total events currently inside the window.
    pub fn total(&self) -> u64 {
        self.buckets.values().sum()
    }

    /// Serialize to `(minute, count)` pairs plus the window size.
    pub fn serialize(&self) -> (usize, Vec<(i64, u64)>) {
        (
            self.window_size,
            self.buckets.iter().map(|(m, c)| (*m, *c)).collect(),
        )
    }

    /// Restore from the pairs produced by [`serialize`](Self::serialize).
    pub fn restore(window_size: usize, buckets: Vec<(i64, u64)>) -> Self {
        let mut tracker = Self::new(window_size);
        tracker.latest_minute = buckets.iter().map(|(m, _)| *m).max();
        tracker.buckets = buckets.into_iter().collect();
        tracker.prune();
        tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_empty_tracker_returns_no_buckets() {
        let tracker = HeatmapTracker::new(10);
        assert!(tracker.get_buckets().is_empty());
        assert_eq!(tracker.total(), 0);
    }

    #[test]
    fn test_minute_resolution() {
        let mut tracker = HeatmapTracker::new(10);
        let t = 1_700_000_040; // mid-minute start point
        tracker.record(at(t));
        tracker.record(at(t + 30));
        tracker.record(at(t + 60));

        let buckets = tracker.get_buckets();
        assert_eq!(buckets.len(), 10);
        assert_eq!(buckets[buckets.len() - 1].count, 1);
        assert_eq!(buckets[buckets.len() - 2].count, 2);
    }

    #[test]
    fn test_old_buckets_pruned() {
        let mut tracker = HeatmapTracker::new(10);
        let t = 1_700_000_040;
        tracker.record(at(t));
        // 10 windows later: the first bucket falls out entirely
        tracker.record(at(t + 10 * 10 * 60));

        let nonzero: Vec<_> = tracker
            .get_buckets()
            .into_iter()
            .filter(|b| b.count > 0)
            .collect();
        assert_eq!(nonzero.len(), 1);
        assert_eq!(nonzero[0].count, 1);
    }

    #[test]
    fn test_invalid_timestamp_ignored() {
        let mut tracker = HeatmapTracker::new(5);
        tracker.record(at(-100));
        assert!(tracker.get_buckets().is_empty());

        tracker.record(at(1_700_000_000));
        assert_eq!(tracker.total(), 1);
    }

    #[test]
    fn test_serialize_restore_round_trip() {
        let mut tracker = HeatmapTracker::new(8);
        let t = 1_700_000_000;
        tracker.record(at(t));
        tracker.record(at(t + 60));
        tracker.record(at(t + 61));

        let (window, buckets) = tracker.serialize();
        let restored = HeatmapTracker::restore(window, buckets);
        assert_eq!(restored.get_buckets(), tracker.get_buckets());
        assert_eq!(restored.total(), tracker.total());
    }
}
