//! Burn-rate sampling over a trailing sliding window
//!
//! Token counts are accumulated into fixed-interval sample buckets; buckets
//! older than the window are pruned on every write, so the ring stays at a
//! fixed size regardless of session length.

use super::metrics::BurnSample;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Ring of token-count samples across a sliding window.
#[derive(Debug, Clone)]
pub struct BurnRateSampler {
    window_ms: u64,
    sample_ms: u64,
    /// Oldest first; at most `window_ms / sample_ms + 1` entries
    samples: VecDeque<BurnSample>,
}

impl BurnRateSampler {
    pub fn new(window_ms: u64, sample_ms: u64) -> Self {
        Self {
            window_ms: window_ms.max(1),
            sample_ms: sample_ms.max(1),
            samples: VecDeque::new(),
        }
    }

    /// Record `tokens` consumed at `timestamp`.
    ///
    /// Pre-epoch timestamps are invalid and silently ignored.
    pub fn record(&mut self, timestamp: DateTime<Utc>, tokens: u64) {
        let ms = timestamp.timestamp_millis();
        if ms < 0 {
            return;
        }
        let bucket_start_ms = ms - ms % self.sample_ms as i64;

        match self.samples.back_mut() {
            Some(last) if last.bucket_start_ms == bucket_start_ms => {
                last.tokens += tokens;
            }
            Some(last) if last.bucket_start_ms > bucket_start_ms => {
                // Out-of-order sample; fold into the newest bucket rather
                // than reordering the ring
                last.tokens += tokens;
            }
            _ => {
                self.samples.push_back(BurnSample {
                    bucket_start_ms,
                    tokens,
                });
            }
        }

        self.prune();
    }

    fn prune(&mut self) {
        let Some(latest) = self.samples.back().map(|s| s.bucket_start_ms) else {
            return;
        };
        let cutoff = latest - self.window_ms as i64;
        while self
            .samples
            .front()
            .map(|s| s.bucket_start_ms <= cutoff)
            .unwrap_or(false)
        {
            self.samples.pop_front();
        }
    }

    /// Tokens per minute: windowed sum divided by window-minutes.
    pub fn tokens_per_minute(&self) -> f64 {
        let total: u64 = self.samples.iter().map(|s| s.tokens).sum();
        let window_minutes = self.window_ms as f64 / 60_000.0;
        total as f64 / window_minutes
    }

    /// Raw sample points for charting, oldest first.
    pub fn samples(&self) -> Vec<BurnSample> {
        self.samples.iter().copied().collect()
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn sample_ms(&self) -> u64 {
        self.sample_ms
    }

    /// Restore from previously captured samples.
    pub fn restore(window_ms: u64, sample_ms: u64, samples: Vec<BurnSample>) -> Self {
        let mut sampler = Self::new(window_ms, sample_ms);
        sampler.samples = samples.into_iter().collect();
        sampler.prune();
        sampler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_same_bucket_accumulates() {
        let mut sampler = BurnRateSampler::new(60_000, 10_000);
        sampler.record(at_ms(1_000_000), 100);
        sampler.record(at_ms(1_005_000), 50);

        let samples = sampler.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].tokens, 150);
    }

    #[test]
    fn test_tokens_per_minute() {
        // 1-minute window, 10s samples
        let mut sampler = BurnRateSampler::new(60_000, 10_000);
        sampler.record(at_ms(1_000_000), 300);
        sampler.record(at_ms(1_010_000), 300);

        // 600 tokens over a 1-minute window
        assert!((sampler.tokens_per_minute() - 600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_old_samples_pruned() {
        let mut sampler = BurnRateSampler::new(60_000, 10_000);
        sampler.record(at_ms(1_000_000), 1000);
        // Two minutes later, the first bucket is out of the window
        sampler.record(at_ms(1_120_000), 10);

        assert_eq!(sampler.samples().len(), 1);
        assert!((sampler.tokens_per_minute() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_timestamp_ignored() {
        let mut sampler = BurnRateSampler::new(60_000, 10_000);
        sampler.record(at_ms(-5), 100);
        assert!(sampler.samples().is_empty());
    }

    #[test]
    fn test_restore_round_trip() {
        let mut sampler = BurnRateSampler::new(60_000, 10_000);
        sampler.record(at_ms(1_000_000), 42);
        sampler.record(at_ms(1_020_000), 7);

        let restored = BurnRateSampler::restore(60_000, 10_000, sampler.samples());
        assert_eq!(restored.samples(), sampler.samples());
        assert_eq!(restored.tokens_per_minute(), sampler.tokens_per_minute());
    }
}
