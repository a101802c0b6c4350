//! Bounded tracker data structures
//!
//! Small reusable structures with deterministic memory bounds, used by the
//! event aggregator and by consumers for lightweight analytics:
//!
//! - [`FrequencyTracker`]: a capped frequency counter with
//!   least-recently-touched eviction
//! - [`HeatmapTracker`]: a rolling window of one-minute activity buckets

mod frequency;
mod heatmap;

pub use frequency::{FrequencyEntry, FrequencyTracker};
pub use heatmap::{HeatmapBucket, HeatmapTracker};
