//! Metric record types owned by the event aggregator
//!
//! [`AggregatedMetrics`] is the mutable snapshot mutated in place by
//! [`EventAggregator::ingest`](super::EventAggregator::ingest) and exposed
//! to consumers only as read views or a serialized copy.

use crate::classify::MessageClass;
use crate::event::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

// ============================================
// Counters and totals
// ============================================

/// Message/event counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub total_events: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub tool_uses: u64,
    pub tool_results: u64,
    pub summaries: u64,
    pub system_events: u64,
    /// Events ingested but excluded from display surfaces
    pub hard_noise_events: u64,
}

/// Running token totals plus reported cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

impl TokenTotals {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }
}

/// Per-model usage, keyed by model id in [`AggregatedMetrics::per_model`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

impl ModelUsage {
    pub fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }
}

// ============================================
// Context attribution
// ============================================

/// Attribution bucket for one context-size delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionBucket {
    SystemPrompt,
    User,
    Assistant,
    ToolInput,
    ToolOutput,
    Thinking,
    Other,
}

/// Breakdown of current context size by originating content category.
///
/// Invariant: the buckets sum exactly to the current context size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAttribution {
    pub system_prompt: u64,
    pub user: u64,
    pub assistant: u64,
    pub tool_input: u64,
    pub tool_output: u64,
    pub thinking: u64,
    pub other: u64,
}

impl ContextAttribution {
    pub fn sum(&self) -> u64 {
        self.system_prompt
            + self.user
            + self.assistant
            + self.tool_input
            + self.tool_output
            + self.thinking
            + self.other
    }

    pub fn bucket_mut(&mut self, bucket: AttributionBucket) -> &mut u64 {
        match bucket {
            AttributionBucket::SystemPrompt => &mut self.system_prompt,
            AttributionBucket::User => &mut self.user,
            AttributionBucket::Assistant => &mut self.assistant,
            AttributionBucket::ToolInput => &mut self.tool_input,
            AttributionBucket::ToolOutput => &mut self.tool_output,
            AttributionBucket::Thinking => &mut self.thinking,
            AttributionBucket::Other => &mut self.other,
        }
    }

    /// Scale every bucket to a new total, preserving proportions.
    ///
    /// Rounding remainders land in `other` so the sum invariant stays exact.
    pub fn rescale(&mut self, new_total: u64) {
        let old_total = self.sum();
        if old_total == 0 {
            self.other = new_total;
            return;
        }

        self.system_prompt = self.system_prompt * new_total / old_total;
        self.user = self.user * new_total / old_total;
        self.assistant = self.assistant * new_total / old_total;
        self.tool_input = self.tool_input * new_total / old_total;
        self.tool_output = self.tool_output * new_total / old_total;
        self.thinking = self.thinking * new_total / old_total;
        self.other = self.other * new_total / old_total;

        let scaled = self.sum();
        self.other += new_total.saturating_sub(scaled);
    }
}

// ============================================
// Compaction / truncation
// ============================================

/// A detected context compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionEvent {
    pub timestamp: DateTime<Utc>,
    pub before_tokens: u64,
    pub after_tokens: u64,
    pub reclaimed_tokens: u64,
}

/// A detected output truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationEvent {
    pub timestamp: DateTime<Utc>,
    /// Tool whose output was truncated, when known
    pub tool_name: Option<String>,
}

// ============================================
// Tool analytics
// ============================================

/// Per-tool call outcome counters and cumulative duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStats {
    pub success: u64,
    pub failure: u64,
    pub pending: u64,
    pub total_duration_ms: u64,
}

impl ToolStats {
    pub fn calls(&self) -> u64 {
        self.success + self.failure + self.pending
    }
}

// ============================================
// Burn rate
// ============================================

/// One burn-rate sample bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnSample {
    /// Start of the sample interval, milliseconds since the Unix epoch
    pub bucket_start_ms: i64,
    pub tokens: u64,
}

// ============================================
// Tasks
// ============================================

/// Lifecycle status of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
        }
    }
}

/// One task from the agent's task list.
///
/// Tasks are never deleted, only status-transitioned; at most one task is
/// active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTask {
    pub id: String,
    pub subject: String,
    pub status: TaskStatus,
    /// Tool calls observed while this task was active
    pub tool_calls: u64,
    /// True when the task was restored from a snapshot rather than created
    /// in this session
    pub carried_over: bool,
    /// Event count at creation time; the difference to the current total is
    /// the task's session age
    pub created_at_event: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Subagents
// ============================================

/// Lifecycle status of a spawned subagent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

/// One spawned subagent and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentRecord {
    /// Correlation id of the spawning tool call
    pub id: String,
    pub description: String,
    pub status: SubagentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

// ============================================
// Plan state
// ============================================

/// One plan step parsed from markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub text: String,
    pub completed: bool,
}

/// Current plan-mode state; `None` on [`AggregatedMetrics`] until plan mode
/// is first entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub active: bool,
    pub title: Option<String>,
    pub steps: Vec<PlanStep>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Timeline
// ============================================

/// One display-worthy timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub class: MessageClass,
    /// First line of the event's content, truncated for display
    pub summary: String,
}

// ============================================
// Latency
// ============================================

/// Aggregate statistics over the capped latency sample window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Samples recorded over the whole session (not capped)
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

// ============================================
// The snapshot
// ============================================

/// The metrics snapshot owned exclusively by the event aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    // Session bounds
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,

    pub counts: EventCounts,

    // Token accounting
    pub totals: TokenTotals,
    /// Keyed by model id; insertion order irrelevant
    pub per_model: HashMap<String, ModelUsage>,

    // Context
    pub context_size: u64,
    pub attribution: ContextAttribution,
    /// Append-only within a session
    pub compactions: Vec<CompactionEvent>,
    /// Append-only within a session
    pub truncations: Vec<TruncationEvent>,

    // Tool analytics, keyed by canonical tool name
    pub tool_stats: HashMap<String, ToolStats>,

    // Task state
    pub tasks: HashMap<String, TrackedTask>,
    pub active_task_id: Option<String>,

    // Subagent lifecycles, in spawn order
    pub subagents: Vec<SubagentRecord>,

    // Plan state
    pub plan: Option<PlanState>,

    // Capped FIFO timeline
    pub timeline: VecDeque<TimelineEntry>,

    // Latency samples (capped) and whole-session count
    pub latency_samples: VecDeque<u64>,
    pub latency_count: u64,
}

impl AggregatedMetrics {
    /// Session duration, when at least one event has been seen.
    pub fn session_duration(&self) -> Option<chrono::Duration> {
        match (self.first_event_at, self.last_event_at) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        }
    }

    /// Aggregate latency statistics over the current sample window.
    pub fn latency_summary(&self) -> LatencySummary {
        if self.latency_samples.is_empty() {
            return LatencySummary {
                count: self.latency_count,
                ..Default::default()
            };
        }

        let mut sorted: Vec<u64> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();
        let len = sorted.len();
        let sum: u64 = sorted.iter().sum();

        LatencySummary {
            count: self.latency_count,
            mean_ms: sum as f64 / len as f64,
            p50_ms: sorted[len / 2],
            p95_ms: sorted[(len * 95 / 100).min(len - 1)],
            max_ms: sorted[len - 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_rescale_preserves_sum() {
        let mut attr = ContextAttribution {
            system_prompt: 1000,
            user: 300,
            assistant: 200,
            tool_input: 77,
            tool_output: 423,
            thinking: 0,
            other: 0,
        };
        attr.rescale(500);
        assert_eq!(attr.sum(), 500);

        attr.rescale(0);
        assert_eq!(attr.sum(), 0);
    }

    #[test]
    fn test_attribution_rescale_from_zero() {
        let mut attr = ContextAttribution::default();
        attr.rescale(100);
        assert_eq!(attr.sum(), 100);
        assert_eq!(attr.other, 100);
    }

    #[test]
    fn test_latency_summary() {
        let mut metrics = AggregatedMetrics::default();
        for ms in [100u64, 200, 300, 400, 1000] {
            metrics.latency_samples.push_back(ms);
        }
        metrics.latency_count = 5;

        let summary = metrics.latency_summary();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.mean_ms, 400.0);
        assert_eq!(summary.p50_ms, 300);
        assert_eq!(summary.max_ms, 1000);
    }

    #[test]
    fn test_latency_summary_empty() {
        let metrics = AggregatedMetrics::default();
        let summary = metrics.latency_summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean_ms, 0.0);
    }
}
