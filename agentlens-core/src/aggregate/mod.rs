//! Stateful event aggregation
//!
//! The aggregator ingests one canonical event at a time and incrementally
//! updates an [`AggregatedMetrics`] snapshot. It owns the snapshot
//! exclusively; consumers read it through accessor views or a serialized
//! copy, never through shared mutation.
//!
//! ## Failure semantics
//!
//! Ingestion never fails: malformed or partially-populated events degrade
//! gracefully (missing fields are treated as zero/absent) and processing
//! continues with the next event. Snapshot restore with an incompatible
//! schema version logs a diagnostic and falls back to an empty state.

mod burn;
mod metrics;

pub use burn::BurnRateSampler;
pub use metrics::{
    AggregatedMetrics, AttributionBucket, BurnSample, CompactionEvent, ContextAttribution,
    EventCounts, LatencySummary, ModelUsage, PlanState, PlanStep, SubagentRecord, SubagentStatus,
    TaskStatus, TimelineEntry, TokenTotals, ToolStats, TrackedTask, TruncationEvent,
};

use crate::classify::{classify, is_hard_noise, should_merge};
use crate::config::PipelineConfig;
use crate::event::{CanonicalEvent, ContentBlock, EventKind};
use crate::ingest::normalizer::{PendingCall, PendingCalls};
use crate::trackers::{FrequencyTracker, HeatmapTracker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot schema version; bump when the serialized layout changes.
const SNAPSHOT_VERSION: u32 = 1;

/// A summary-adjacent context drop of at least this fraction counts as a
/// compaction.
const COMPACTION_DROP_RATIO: f64 = 0.4;

/// Capacity of the per-tool frequency tracker.
const TOOL_FREQUENCY_CAP: usize = 64;

/// Rolling window of the activity heatmap, in minutes.
const ACTIVITY_WINDOW_MINUTES: usize = 60;

/// Markers that indicate a tool's output was cut short.
const TRUNCATION_MARKERS: &[&str] = &[
    "[output truncated]",
    "(output truncated)",
    "<response clipped>",
    "[truncated due to length]",
];

/// Maximum characters kept in a timeline entry summary.
const TIMELINE_SUMMARY_MAX: usize = 160;

// ============================================
// Aggregator
// ============================================

/// The stateful core of the pipeline.
///
/// Not safe for concurrent mutation; callers serialize `ingest()` calls
/// (one pipeline task per monitored session).
pub struct EventAggregator {
    config: PipelineConfig,
    metrics: AggregatedMetrics,
    burn: BurnRateSampler,
    tool_frequency: FrequencyTracker,
    activity: HeatmapTracker,

    // Transient working state
    pending_tools: PendingCalls,
    pending_prompt_at: Option<DateTime<Utc>>,
    /// Context size captured when a summary event armed a compaction check
    compaction_armed: Option<u64>,
    last_plan_path: Option<String>,
    last_display_event: Option<CanonicalEvent>,
}

impl EventAggregator {
    /// Create an empty aggregator for a new session.
    pub fn new(config: PipelineConfig) -> Self {
        let burn = BurnRateSampler::new(config.burn_window_ms, config.burn_sample_ms);
        let pending_tools = PendingCalls::new(config.max_pending_calls);
        Self {
            config,
            metrics: AggregatedMetrics::default(),
            burn,
            tool_frequency: FrequencyTracker::new(TOOL_FREQUENCY_CAP),
            activity: HeatmapTracker::new(ACTIVITY_WINDOW_MINUTES),
            pending_tools,
            pending_prompt_at: None,
            compaction_armed: None,
            last_plan_path: None,
            last_display_event: None,
        }
    }

    // ----------------------------------------
    // Read accessors
    // ----------------------------------------

    /// The current metrics snapshot.
    pub fn metrics(&self) -> &AggregatedMetrics {
        &self.metrics
    }

    /// Tokens consumed per minute over the burn window (all four token
    /// categories count as consumption).
    pub fn tokens_per_minute(&self) -> f64 {
        self.burn.tokens_per_minute()
    }

    /// Raw burn-rate sample points for charting, oldest first.
    pub fn burn_samples(&self) -> Vec<BurnSample> {
        self.burn.samples()
    }

    /// Per-tool invocation frequency (capped, LRU-evicted).
    pub fn tool_frequency(&self) -> &FrequencyTracker {
        &self.tool_frequency
    }

    /// Events-per-minute activity heatmap over the trailing hour.
    pub fn activity(&self) -> &HeatmapTracker {
        &self.activity
    }

    /// Tool calls still awaiting a result, oldest first.
    pub fn in_flight_tools(&self) -> Vec<PendingCall> {
        self.pending_tools.in_flight()
    }

    // ----------------------------------------
    // Ingestion
    // ----------------------------------------

    /// Ingest one canonical event, updating the snapshot in place.
    pub fn ingest(&mut self, event: &CanonicalEvent) {
        let ts = event.timestamp;

        self.metrics.counts.total_events += 1;
        if self.metrics.first_event_at.is_none() {
            self.metrics.first_event_at = Some(ts);
        }
        self.metrics.last_event_at = Some(ts);
        self.activity.record(ts);

        let hard_noise = is_hard_noise(event);
        if hard_noise {
            self.metrics.counts.hard_noise_events += 1;
        }

        match event.kind {
            EventKind::User => self.metrics.counts.user_messages += 1,
            EventKind::Assistant => self.metrics.counts.assistant_messages += 1,
            EventKind::ToolUse => self.metrics.counts.tool_uses += 1,
            EventKind::ToolResult => self.metrics.counts.tool_results += 1,
            EventKind::Summary => self.metrics.counts.summaries += 1,
            EventKind::System => self.metrics.counts.system_events += 1,
        }

        if event.message.usage.is_some() {
            self.account_usage(event, ts);
        }
        // Summary events arm the compaction check against the size the
        // context had before the compaction took effect.
        if event.kind == EventKind::Summary {
            self.compaction_armed = Some(self.metrics.context_size);
        }

        // Truncation detection needs the pending-call table intact, so it
        // runs before pairing consumes the record.
        self.track_truncation(event, ts);
        self.track_tools(event, ts);
        self.track_latency(event, ts, hard_noise);

        if !hard_noise {
            self.append_timeline(event, ts);
        }
    }

    // ----------------------------------------
    // Token and context accounting
    // ----------------------------------------

    fn account_usage(&mut self, event: &CanonicalEvent, ts: DateTime<Utc>) {
        let Some(usage) = event.message.usage else {
            return;
        };

        self.metrics.totals.input_tokens += usage.input_tokens;
        self.metrics.totals.output_tokens += usage.output_tokens;
        self.metrics.totals.cache_write_tokens += usage.cache_write_tokens;
        self.metrics.totals.cache_read_tokens += usage.cache_read_tokens;
        if let Some(cost) = usage.cost_usd {
            self.metrics.totals.cost_usd += cost;
        }

        let model = event
            .message
            .model
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let entry = self.metrics.per_model.entry(model).or_default();
        entry.calls += 1;
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.cache_write_tokens += usage.cache_write_tokens;
        entry.cache_read_tokens += usage.cache_read_tokens;
        if let Some(cost) = usage.cost_usd {
            entry.cost_usd += cost;
        }

        self.burn.record(ts, usage.total());

        let new_size = self.config.context_size(&usage);
        self.apply_context_size(new_size, attribution_bucket(event), ts);
    }

    /// Recompute context size, attributing the delta to exactly one bucket
    /// and keeping the buckets-sum invariant exact.
    fn apply_context_size(
        &mut self,
        new_size: u64,
        bucket: AttributionBucket,
        ts: DateTime<Utc>,
    ) {
        let old_size = self.metrics.context_size;

        if new_size >= old_size {
            *self.metrics.attribution.bucket_mut(bucket) += new_size - old_size;
        } else {
            self.metrics.attribution.rescale(new_size);
        }
        self.metrics.context_size = new_size;

        // A pending compaction check fires on the first recompute after the
        // summary event.
        if let Some(before) = self.compaction_armed.take() {
            if before > 0
                && new_size < before
                && (before - new_size) as f64 >= before as f64 * COMPACTION_DROP_RATIO
            {
                self.metrics.compactions.push(CompactionEvent {
                    timestamp: ts,
                    before_tokens: before,
                    after_tokens: new_size,
                    reclaimed_tokens: before - new_size,
                });
                tracing::info!(
                    before = before,
                    after = new_size,
                    "context compaction detected"
                );
            }
        }
    }

    // ----------------------------------------
    // Tool analytics, tasks, subagents, plans
    // ----------------------------------------

    fn track_tools(&mut self, event: &CanonicalEvent, ts: DateTime<Utc>) {
        if let Some((id, name, input)) = event.tool_use() {
            let name = name.to_string();
            let input = input.clone();
            let id = id.to_string();

            self.tool_frequency.increment(&name, ts);
            self.metrics.tool_stats.entry(name.clone()).or_default().pending += 1;
            self.pending_tools.insert(PendingCall {
                call_id: id.clone(),
                tool_name: name.clone(),
                started_at: ts,
                arguments: input.clone(),
            });

            if let Some(active_id) = self.metrics.active_task_id.clone() {
                if let Some(task) = self.metrics.tasks.get_mut(&active_id) {
                    task.tool_calls += 1;
                }
            }

            match name.as_str() {
                "Task" => self.spawn_subagent(&id, &input, ts),
                "TodoWrite" => self.apply_todo_list(&input, ts),
                "TaskCreate" => self.apply_task_create(&input, ts),
                "TaskUpdate" => self.apply_task_update(&input, ts),
                "EnterPlanMode" => self.enter_plan_mode(ts),
                "ExitPlanMode" => self.exit_plan_mode(&input, ts),
                "Write" | "Edit" => self.observe_file_edit(&name, &input, ts),
                _ => {}
            }
            return;
        }

        if let Some((id, _content, is_error)) = event.tool_result() {
            let id = id.to_string();

            match self.pending_tools.take(&id) {
                Some(call) => {
                    let stats = self
                        .metrics
                        .tool_stats
                        .entry(call.tool_name.clone())
                        .or_default();
                    stats.pending = stats.pending.saturating_sub(1);
                    if is_error {
                        stats.failure += 1;
                    } else {
                        stats.success += 1;
                    }
                    let duration_ms = (ts - call.started_at).num_milliseconds().max(0) as u64;
                    stats.total_duration_ms += duration_ms;
                }
                None => {
                    // Result for a call we never saw; count the outcome
                    // without a duration
                    let stats = self
                        .metrics
                        .tool_stats
                        .entry("Unknown".to_string())
                        .or_default();
                    if is_error {
                        stats.failure += 1;
                    } else {
                        stats.success += 1;
                    }
                }
            }

            self.complete_subagent(&id, is_error, ts);
        }
    }

    fn spawn_subagent(&mut self, call_id: &str, input: &Value, ts: DateTime<Utc>) {
        let description = input
            .get("description")
            .or_else(|| input.get("prompt"))
            .and_then(Value::as_str)
            .unwrap_or("subagent")
            .lines()
            .next()
            .unwrap_or("subagent")
            .to_string();

        self.metrics.subagents.push(SubagentRecord {
            id: call_id.to_string(),
            description,
            status: SubagentStatus::Running,
            started_at: ts,
            completed_at: None,
            duration_ms: None,
        });
    }

    fn complete_subagent(&mut self, call_id: &str, is_error: bool, ts: DateTime<Utc>) {
        if let Some(record) = self
            .metrics
            .subagents
            .iter_mut()
            .find(|r| r.id == call_id && r.status == SubagentStatus::Running)
        {
            record.status = if is_error {
                SubagentStatus::Failed
            } else {
                SubagentStatus::Completed
            };
            record.completed_at = Some(ts);
            record.duration_ms = Some((ts - record.started_at).num_milliseconds().max(0) as u64);
        }
    }

    /// Full task-list replacement (`TodoWrite` style payload).
    fn apply_todo_list(&mut self, input: &Value, ts: DateTime<Utc>) {
        let Some(todos) = input.get("todos").and_then(Value::as_array) else {
            return;
        };

        for todo in todos {
            let Some(subject) = todo
                .get("content")
                .or_else(|| todo.get("subject"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let status = match todo.get("status").and_then(Value::as_str) {
                Some("in_progress") | Some("active") => TaskStatus::Active,
                Some("completed") => TaskStatus::Completed,
                _ => TaskStatus::Pending,
            };
            let id = todo
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(subject)
                .to_string();
            self.upsert_task(&id, subject, status, ts);
        }
    }

    /// Single-task creation (`TaskCreate` style payload).
    fn apply_task_create(&mut self, input: &Value, ts: DateTime<Utc>) {
        let Some(subject) = input.get("subject").and_then(Value::as_str) else {
            return;
        };
        let id = input
            .get("taskId")
            .or_else(|| input.get("id"))
            .and_then(Value::as_str)
            .unwrap_or(subject)
            .to_string();
        self.upsert_task(&id, subject, TaskStatus::Pending, ts);
    }

    /// Single-task transition (`TaskUpdate` style payload).
    fn apply_task_update(&mut self, input: &Value, ts: DateTime<Utc>) {
        let Some(id) = input
            .get("taskId")
            .or_else(|| input.get("id"))
            .and_then(Value::as_str)
        else {
            return;
        };
        let id = id.to_string();

        let subject = input
            .get("subject")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| self.metrics.tasks.get(&id).map(|t| t.subject.clone()))
            .unwrap_or_else(|| id.clone());

        let status = match input.get("status").and_then(Value::as_str) {
            Some("in_progress") | Some("active") => TaskStatus::Active,
            Some("completed") => TaskStatus::Completed,
            Some("pending") => TaskStatus::Pending,
            // Tasks are never deleted; unknown transitions keep the current
            // status
            _ => self
                .metrics
                .tasks
                .get(&id)
                .map(|t| t.status)
                .unwrap_or(TaskStatus::Pending),
        };

        self.upsert_task(&id, &subject, status, ts);
    }

    fn upsert_task(&mut self, id: &str, subject: &str, status: TaskStatus, ts: DateTime<Utc>) {
        let created_at_event = self.metrics.counts.total_events;
        let task = self
            .metrics
            .tasks
            .entry(id.to_string())
            .or_insert_with(|| TrackedTask {
                id: id.to_string(),
                subject: subject.to_string(),
                status: TaskStatus::Pending,
                tool_calls: 0,
                carried_over: false,
                created_at_event,
                created_at: ts,
                updated_at: ts,
            });
        task.subject = subject.to_string();
        task.status = status;
        task.updated_at = ts;

        if status == TaskStatus::Active {
            // At most one task is active at a time
            let id = id.to_string();
            for (other_id, other) in self.metrics.tasks.iter_mut() {
                if *other_id != id && other.status == TaskStatus::Active {
                    other.status = TaskStatus::Pending;
                }
            }
            self.metrics.active_task_id = Some(id);
        } else if self.metrics.active_task_id.as_deref() == Some(id) {
            self.metrics.active_task_id = None;
        }
    }

    fn enter_plan_mode(&mut self, ts: DateTime<Utc>) {
        match &mut self.metrics.plan {
            Some(plan) => {
                plan.active = true;
                plan.updated_at = ts;
            }
            None => {
                self.metrics.plan = Some(PlanState {
                    active: true,
                    title: None,
                    steps: Vec::new(),
                    updated_at: ts,
                });
            }
        }
    }

    fn exit_plan_mode(&mut self, input: &Value, ts: DateTime<Utc>) {
        let inline = input.get("plan").and_then(Value::as_str).map(String::from);
        let text = inline.or_else(|| {
            // The agent may have written the plan to a file instead of
            // passing it inline
            let path = self.last_plan_path.as_deref()?;
            let reader = self.config.read_plan_file.as_ref()?;
            reader(path)
        });

        let (title, steps) = match text {
            Some(text) => parse_plan_markdown(&text),
            None => (None, Vec::new()),
        };

        self.metrics.plan = Some(PlanState {
            active: false,
            title,
            steps,
            updated_at: ts,
        });
    }

    fn observe_file_edit(&mut self, tool: &str, input: &Value, ts: DateTime<Utc>) {
        let Some(path) = input.get("file_path").and_then(Value::as_str) else {
            return;
        };
        if !path.contains("/plans/") && !path.ends_with(".plan.md") {
            return;
        }
        self.last_plan_path = Some(path.to_string());

        // A full Write carries the plan inline; an Edit needs the injected
        // reader at exit time.
        if tool == "Write" {
            if let Some(content) = input.get("content").and_then(Value::as_str) {
                let (title, steps) = parse_plan_markdown(content);
                let active = self.metrics.plan.as_ref().map(|p| p.active).unwrap_or(true);
                self.metrics.plan = Some(PlanState {
                    active,
                    title,
                    steps,
                    updated_at: ts,
                });
            }
        }
    }

    // ----------------------------------------
    // Truncation detection
    // ----------------------------------------

    fn track_truncation(&mut self, event: &CanonicalEvent, ts: DateTime<Utc>) {
        for block in &event.message.content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                if TRUNCATION_MARKERS.iter().any(|m| content.contains(m)) {
                    let tool_name = self
                        .pending_tools
                        .get(tool_use_id)
                        .map(|call| call.tool_name.clone());
                    self.metrics.truncations.push(TruncationEvent {
                        timestamp: ts,
                        tool_name,
                    });
                }
            }
        }
    }

    // ----------------------------------------
    // Latency
    // ----------------------------------------

    fn track_latency(&mut self, event: &CanonicalEvent, ts: DateTime<Utc>, hard_noise: bool) {
        match event.kind {
            EventKind::User if !hard_noise => {
                self.pending_prompt_at = Some(ts);
            }
            EventKind::Assistant => {
                if let Some(prompt_at) = self.pending_prompt_at.take() {
                    let sample_ms = (ts - prompt_at).num_milliseconds().max(0) as u64;
                    self.metrics.latency_samples.push_back(sample_ms);
                    while self.metrics.latency_samples.len() > self.config.latency_cap {
                        self.metrics.latency_samples.pop_front();
                    }
                    self.metrics.latency_count += 1;
                }
            }
            _ => {}
        }
    }

    // ----------------------------------------
    // Timeline
    // ----------------------------------------

    fn append_timeline(&mut self, event: &CanonicalEvent, ts: DateTime<Utc>) {
        let Some(summary) = timeline_summary(event) else {
            return;
        };

        if should_merge(event, self.last_display_event.as_ref()) {
            if let Some(last) = self.metrics.timeline.back_mut() {
                last.timestamp = ts;
                last.summary = truncate_summary(&format!("{} {}", last.summary, summary));
                self.last_display_event = Some(event.clone());
                return;
            }
        }

        self.metrics.timeline.push_back(TimelineEntry {
            timestamp: ts,
            kind: event.kind,
            class: classify(event),
            summary,
        });
        while self.metrics.timeline.len() > self.config.timeline_cap {
            self.metrics.timeline.pop_front();
        }
        self.last_display_event = Some(event.clone());
    }

    // ----------------------------------------
    // Snapshot persistence
    // ----------------------------------------

    /// Serialize the full aggregator state to an opaque versioned blob.
    pub fn serialize(&self) -> Value {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            metrics: self.metrics.clone(),
            burn_window_ms: self.burn.window_ms(),
            burn_sample_ms: self.burn.sample_ms(),
            burn_samples: self.burn.samples(),
            tool_frequency: self.tool_frequency.serialize(),
            activity: self.activity.serialize(),
            pending_tools: self.pending_tools.in_flight(),
            pending_prompt_at: self.pending_prompt_at,
            compaction_armed: self.compaction_armed,
            last_plan_path: self.last_plan_path.clone(),
        };
        serde_json::to_value(&snapshot).unwrap_or(Value::Null)
    }

    /// Restore an aggregator from a serialized snapshot.
    ///
    /// An incompatible schema version logs a diagnostic and falls back to an
    /// empty state; restore never fails.
    pub fn restore(config: PipelineConfig, state: &Value) -> Self {
        let snapshot: Snapshot = match serde_json::from_value(state.clone()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot did not deserialize, starting empty");
                return Self::new(config);
            }
        };

        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                found = snapshot.version,
                expected = SNAPSHOT_VERSION,
                "snapshot schema version mismatch, starting empty"
            );
            return Self::new(config);
        }

        let mut aggregator = Self::new(config);
        aggregator.metrics = snapshot.metrics;
        // Tasks that survive a restart belong to an earlier run
        for task in aggregator.metrics.tasks.values_mut() {
            task.carried_over = true;
        }
        aggregator.burn = BurnRateSampler::restore(
            snapshot.burn_window_ms,
            snapshot.burn_sample_ms,
            snapshot.burn_samples,
        );
        aggregator.tool_frequency =
            FrequencyTracker::restore(TOOL_FREQUENCY_CAP, snapshot.tool_frequency);
        aggregator.activity = HeatmapTracker::restore(snapshot.activity.0, snapshot.activity.1);
        for call in snapshot.pending_tools {
            aggregator.pending_tools.insert(call);
        }
        aggregator.pending_prompt_at = snapshot.pending_prompt_at;
        aggregator.compaction_armed = snapshot.compaction_armed;
        aggregator.last_plan_path = snapshot.last_plan_path;
        aggregator
    }

    /// Discard all state, keeping the configuration.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

/// Serialized aggregator state.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    metrics: AggregatedMetrics,
    burn_window_ms: u64,
    burn_sample_ms: u64,
    burn_samples: Vec<BurnSample>,
    tool_frequency: Vec<(String, u64, DateTime<Utc>, DateTime<Utc>)>,
    activity: (usize, Vec<(i64, u64)>),
    pending_tools: Vec<PendingCall>,
    pending_prompt_at: Option<DateTime<Utc>>,
    compaction_armed: Option<u64>,
    last_plan_path: Option<String>,
}

// ============================================
// Helpers
// ============================================

/// Pick the attribution bucket for an event's context-size delta.
fn attribution_bucket(event: &CanonicalEvent) -> AttributionBucket {
    match event.kind {
        EventKind::User => AttributionBucket::User,
        EventKind::Assistant => {
            let has_text = event
                .message
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::Text { .. }));
            let has_thinking = event
                .message
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::Thinking { .. }));
            if has_thinking && !has_text {
                AttributionBucket::Thinking
            } else {
                AttributionBucket::Assistant
            }
        }
        EventKind::ToolUse => AttributionBucket::ToolInput,
        EventKind::ToolResult => AttributionBucket::ToolOutput,
        EventKind::Summary => AttributionBucket::Other,
        EventKind::System => AttributionBucket::SystemPrompt,
    }
}

/// First displayable line of an event, or `None` for content-free events.
fn timeline_summary(event: &CanonicalEvent) -> Option<String> {
    for block in &event.message.content {
        match block {
            ContentBlock::Text { text } | ContentBlock::Thinking { text } => {
                let line = text.lines().find(|l| !l.trim().is_empty())?;
                return Some(truncate_summary(line));
            }
            ContentBlock::ToolUse { name, .. } => {
                return Some(truncate_summary(&format!("→ {}", name)));
            }
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                let line = content.lines().next().unwrap_or("");
                let prefix = if *is_error { "✗" } else { "←" };
                return Some(truncate_summary(&format!("{} {}", prefix, line)));
            }
            ContentBlock::Image { media_type } => {
                return Some(format!("[image {}]", media_type));
            }
        }
    }
    None
}

fn truncate_summary(s: &str) -> String {
    if s.chars().count() <= TIMELINE_SUMMARY_MAX {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(TIMELINE_SUMMARY_MAX - 1).collect();
        format!("{}…", truncated)
    }
}

/// Parse plan steps from markdown: checkbox items first, numbered items as
/// fallback; the title comes from the first `# ` heading.
fn parse_plan_markdown(text: &str) -> (Option<String>, Vec<PlanStep>) {
    let title = text
        .lines()
        .find(|line| line.starts_with("# "))
        .map(|line| line.trim_start_matches("# ").to_string());

    let mut steps = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed
            .strip_prefix("- [ ] ")
            .or_else(|| trimmed.strip_prefix("* [ ] "))
        {
            steps.push(PlanStep {
                text: rest.to_string(),
                completed: false,
            });
        } else if let Some(rest) = trimmed
            .strip_prefix("- [x] ")
            .or_else(|| trimmed.strip_prefix("* [x] "))
        {
            steps.push(PlanStep {
                text: rest.to_string(),
                completed: true,
            });
        }
    }

    if steps.is_empty() {
        for line in text.lines() {
            let trimmed = line.trim_start();
            if let Some(pos) = trimmed.find(". ") {
                if pos > 0 && trimmed[..pos].chars().all(|c| c.is_ascii_digit()) {
                    steps.push(PlanStep {
                        text: trimmed[pos + 2..].to_string(),
                        completed: false,
                    });
                }
            }
        }
    }

    (title, steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CanonicalMessage, Role, TokenUsage};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn aggregator() -> EventAggregator {
        EventAggregator::new(PipelineConfig::default())
    }

    fn user_event(ts: DateTime<Utc>, text: &str) -> CanonicalEvent {
        CanonicalEvent::new(
            EventKind::User,
            ts,
            CanonicalMessage {
                role: Role::User,
                model: None,
                usage: None,
                content: vec![ContentBlock::Text {
                    text: text.to_string(),
                }],
            },
        )
    }

    fn assistant_event(ts: DateTime<Utc>, text: &str, usage: Option<TokenUsage>) -> CanonicalEvent {
        CanonicalEvent::new(
            EventKind::Assistant,
            ts,
            CanonicalMessage {
                role: Role::Assistant,
                model: Some("claude-opus-4".to_string()),
                usage,
                content: vec![ContentBlock::Text {
                    text: text.to_string(),
                }],
            },
        )
    }

    fn tool_use_event(ts: DateTime<Utc>, id: &str, name: &str, input: Value) -> CanonicalEvent {
        CanonicalEvent::new(
            EventKind::ToolUse,
            ts,
            CanonicalMessage {
                role: Role::Assistant,
                model: None,
                usage: None,
                content: vec![ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                }],
            },
        )
    }

    fn tool_result_event(ts: DateTime<Utc>, id: &str, content: &str, is_error: bool) -> CanonicalEvent {
        CanonicalEvent::new(
            EventKind::ToolResult,
            ts,
            CanonicalMessage {
                role: Role::Tool,
                model: None,
                usage: None,
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content: content.to_string(),
                    is_error,
                }],
            },
        )
    }

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cache_write_tokens: 0,
            cache_read_tokens: 0,
            cost_usd: None,
        }
    }

    #[test]
    fn test_token_accounting_per_model() {
        let mut agg = aggregator();
        agg.ingest(&assistant_event(at(10), "a", Some(usage(100, 20))));
        agg.ingest(&assistant_event(at(20), "b", Some(usage(50, 10))));

        let m = agg.metrics();
        assert_eq!(m.totals.input_tokens, 150);
        assert_eq!(m.totals.output_tokens, 30);

        let model = m.per_model.get("claude-opus-4").unwrap();
        assert_eq!(model.calls, 2);
        assert_eq!(model.tokens(), 180);
    }

    #[test]
    fn test_session_bounds_and_counts() {
        let mut agg = aggregator();
        agg.ingest(&user_event(at(100), "hi"));
        agg.ingest(&assistant_event(at(160), "hello", None));

        let m = agg.metrics();
        assert_eq!(m.first_event_at, Some(at(100)));
        assert_eq!(m.last_event_at, Some(at(160)));
        assert_eq!(m.counts.user_messages, 1);
        assert_eq!(m.counts.assistant_messages, 1);
        assert_eq!(m.counts.total_events, 2);
        assert_eq!(m.session_duration().unwrap().num_seconds(), 60);
    }

    #[test]
    fn test_context_attribution_sums_to_context_size() {
        let mut agg = aggregator();
        agg.ingest(&assistant_event(at(10), "a", Some(usage(1000, 50))));
        agg.ingest(&assistant_event(at(20), "b", Some(usage(1400, 60))));

        let m = agg.metrics();
        assert_eq!(m.context_size, 1400);
        assert_eq!(m.attribution.sum(), 1400);
        assert_eq!(m.attribution.assistant, 1400);
    }

    #[test]
    fn test_compaction_detection() {
        let mut agg = aggregator();
        agg.ingest(&assistant_event(at(10), "a", Some(usage(100_000, 50))));

        let summary = CanonicalEvent::new(
            EventKind::Summary,
            at(20),
            CanonicalMessage {
                role: Role::System,
                model: None,
                usage: None,
                content: vec![ContentBlock::Text {
                    text: "compacted".to_string(),
                }],
            },
        );
        agg.ingest(&summary);
        agg.ingest(&assistant_event(at(30), "after", Some(usage(20_000, 10))));

        let m = agg.metrics();
        assert_eq!(m.compactions.len(), 1);
        assert_eq!(m.compactions[0].before_tokens, 100_000);
        assert_eq!(m.compactions[0].after_tokens, 20_000);
        assert_eq!(m.compactions[0].reclaimed_tokens, 80_000);
        // Invariant holds across the shrink
        assert_eq!(m.attribution.sum(), m.context_size);
    }

    #[test]
    fn test_small_drop_is_not_compaction() {
        let mut agg = aggregator();
        agg.ingest(&assistant_event(at(10), "a", Some(usage(100_000, 50))));
        agg.ingest(&CanonicalEvent::new(
            EventKind::Summary,
            at(20),
            CanonicalMessage {
                role: Role::System,
                model: None,
                usage: None,
                content: vec![ContentBlock::Text {
                    text: "s".to_string(),
                }],
            },
        ));
        agg.ingest(&assistant_event(at(30), "b", Some(usage(90_000, 10))));
        assert!(agg.metrics().compactions.is_empty());
    }

    #[test]
    fn test_tool_pairing_and_duration() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(at(100), "t1", "Bash", json!({"command": "ls"})));
        assert_eq!(agg.metrics().tool_stats["Bash"].pending, 1);
        assert_eq!(agg.in_flight_tools().len(), 1);

        agg.ingest(&tool_result_event(at(103), "t1", "ok", false));
        let stats = &agg.metrics().tool_stats["Bash"];
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.total_duration_ms, 3000);
        assert!(agg.in_flight_tools().is_empty());
    }

    #[test]
    fn test_tool_failure_counted() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(at(100), "t1", "Bash", json!({})));
        agg.ingest(&tool_result_event(at(101), "t1", "boom", true));
        let stats = &agg.metrics().tool_stats["Bash"];
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.success, 0);
    }

    #[test]
    fn test_unmatched_tool_use_stays_pending() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(at(100), "t1", "Read", json!({})));
        assert_eq!(agg.metrics().tool_stats["Read"].pending, 1);
        assert_eq!(agg.in_flight_tools()[0].tool_name, "Read");
    }

    #[test]
    fn test_burn_rate() {
        let mut agg = aggregator();
        agg.ingest(&assistant_event(at(1000), "a", Some(usage(500, 100))));
        agg.ingest(&assistant_event(at(1030), "b", Some(usage(400, 0))));

        // 1000 tokens over a 5-minute window
        assert!((agg.tokens_per_minute() - 200.0).abs() < f64::EPSILON);
        assert!(!agg.burn_samples().is_empty());
    }

    #[test]
    fn test_subagent_lifecycle() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(
            at(100),
            "task_1",
            "Task",
            json!({"description": "explore the repo"}),
        ));
        assert_eq!(agg.metrics().subagents.len(), 1);
        assert_eq!(agg.metrics().subagents[0].status, SubagentStatus::Running);

        agg.ingest(&tool_result_event(at(160), "task_1", "done", false));
        let record = &agg.metrics().subagents[0];
        assert_eq!(record.status, SubagentStatus::Completed);
        assert_eq!(record.duration_ms, Some(60_000));
    }

    #[test]
    fn test_unmatched_subagent_stays_running() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(at(100), "task_1", "Task", json!({"description": "x"})));
        assert_eq!(agg.metrics().subagents[0].status, SubagentStatus::Running);
    }

    #[test]
    fn test_todo_list_single_active() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(
            at(100),
            "t1",
            "TodoWrite",
            json!({"todos": [
                {"content": "first", "status": "in_progress"},
                {"content": "second", "status": "pending"}
            ]}),
        ));
        assert_eq!(agg.metrics().active_task_id.as_deref(), Some("first"));

        agg.ingest(&tool_use_event(
            at(200),
            "t2",
            "TodoWrite",
            json!({"todos": [
                {"content": "first", "status": "completed"},
                {"content": "second", "status": "in_progress"}
            ]}),
        ));
        let m = agg.metrics();
        assert_eq!(m.active_task_id.as_deref(), Some("second"));
        assert_eq!(m.tasks["first"].status, TaskStatus::Completed);
        assert_eq!(m.tasks.len(), 2);
    }

    #[test]
    fn test_task_create_update() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(
            at(100),
            "t1",
            "TaskCreate",
            json!({"subject": "Fix parser"}),
        ));
        assert_eq!(agg.metrics().tasks["Fix parser"].status, TaskStatus::Pending);

        agg.ingest(&tool_use_event(
            at(200),
            "t2",
            "TaskUpdate",
            json!({"taskId": "Fix parser", "status": "in_progress"}),
        ));
        assert_eq!(agg.metrics().tasks["Fix parser"].status, TaskStatus::Active);

        // Tool calls while active are attributed to the task
        agg.ingest(&tool_use_event(at(210), "t3", "Bash", json!({})));
        assert_eq!(agg.metrics().tasks["Fix parser"].tool_calls, 1);
    }

    #[test]
    fn test_plan_mode_inline() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(at(100), "p0", "EnterPlanMode", json!({})));
        assert!(agg.metrics().plan.as_ref().unwrap().active);

        agg.ingest(&tool_use_event(
            at(200),
            "p1",
            "ExitPlanMode",
            json!({"plan": "# Migration\n- [ ] step one\n- [x] step two"}),
        ));
        let plan = agg.metrics().plan.as_ref().unwrap();
        assert!(!plan.active);
        assert_eq!(plan.title.as_deref(), Some("Migration"));
        assert_eq!(plan.steps.len(), 2);
        assert!(!plan.steps[0].completed);
        assert!(plan.steps[1].completed);
    }

    #[test]
    fn test_plan_from_file_via_reader() {
        let mut config = PipelineConfig::default();
        config.read_plan_file = Some(Arc::new(|path: &str| {
            assert_eq!(path, "/home/u/.claude/plans/migrate.md");
            Some("- [ ] from file".to_string())
        }));
        let mut agg = EventAggregator::new(config);

        agg.ingest(&tool_use_event(
            at(100),
            "e1",
            "Edit",
            json!({"file_path": "/home/u/.claude/plans/migrate.md",
                   "old_string": "a", "new_string": "b"}),
        ));
        agg.ingest(&tool_use_event(at(200), "p1", "ExitPlanMode", json!({})));

        let plan = agg.metrics().plan.as_ref().unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].text, "from file");
    }

    #[test]
    fn test_timeline_cap_evicts_oldest() {
        let mut config = PipelineConfig::default();
        config.timeline_cap = 3;
        let mut agg = EventAggregator::new(config);

        for i in 0..5 {
            agg.ingest(&user_event(at(i * 100), &format!("prompt {}", i)));
        }
        let timeline = &agg.metrics().timeline;
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.front().unwrap().summary, "prompt 2");
        assert_eq!(timeline.back().unwrap().summary, "prompt 4");
    }

    #[test]
    fn test_timeline_excludes_hard_noise() {
        let mut agg = aggregator();
        let mut sidechain = user_event(at(10), "hidden");
        sidechain.is_sidechain = true;
        agg.ingest(&sidechain);
        assert!(agg.metrics().timeline.is_empty());
        // Still counted for statistics
        assert_eq!(agg.metrics().counts.total_events, 1);
        assert_eq!(agg.metrics().counts.hard_noise_events, 1);
    }

    #[test]
    fn test_timeline_merges_consecutive_assistant_text() {
        let mut agg = aggregator();
        agg.ingest(&assistant_event(at(10), "first.", None));
        agg.ingest(&assistant_event(at(11), "second.", None));
        let timeline = &agg.metrics().timeline;
        assert_eq!(timeline.len(), 1);
        assert!(timeline[0].summary.contains("first."));
        assert!(timeline[0].summary.contains("second."));
    }

    #[test]
    fn test_latency_sampling() {
        let mut agg = aggregator();
        agg.ingest(&user_event(at(100), "prompt"));
        agg.ingest(&assistant_event(at(102), "reply", None));

        let m = agg.metrics();
        assert_eq!(m.latency_count, 1);
        assert_eq!(m.latency_samples[0], 2000);
        assert_eq!(m.latency_summary().max_ms, 2000);
    }

    #[test]
    fn test_latency_only_first_response_counts() {
        let mut agg = aggregator();
        agg.ingest(&user_event(at(100), "prompt"));
        agg.ingest(&assistant_event(at(101), "first", None));
        agg.ingest(&assistant_event(at(109), "second", None));
        assert_eq!(agg.metrics().latency_count, 1);
    }

    #[test]
    fn test_truncation_marker_recorded() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(at(100), "t1", "Bash", json!({})));
        agg.ingest(&tool_result_event(
            at(101),
            "t1",
            "lots of output... [output truncated]",
            false,
        ));
        assert_eq!(agg.metrics().truncations.len(), 1);
        assert_eq!(
            agg.metrics().truncations[0].tool_name.as_deref(),
            Some("Bash")
        );
    }

    #[test]
    fn test_malformed_event_does_not_panic() {
        let mut agg = aggregator();
        // No content, no usage, nothing to chew on
        let bare = CanonicalEvent::new(
            EventKind::System,
            at(10),
            CanonicalMessage {
                role: Role::System,
                model: None,
                usage: None,
                content: Vec::new(),
            },
        );
        agg.ingest(&bare);
        assert_eq!(agg.metrics().counts.system_events, 1);
    }

    #[test]
    fn test_serialize_restore_round_trip() {
        let mut agg = aggregator();
        agg.ingest(&user_event(at(100), "prompt"));
        agg.ingest(&assistant_event(at(105), "reply", Some(usage(1000, 50))));
        agg.ingest(&tool_use_event(at(110), "t1", "Bash", json!({"command": "ls"})));
        agg.ingest(&tool_result_event(at(112), "t1", "ok", false));
        agg.ingest(&tool_use_event(at(120), "t2", "Read", json!({})));

        let blob = agg.serialize();
        let restored = EventAggregator::restore(PipelineConfig::default(), &blob);

        assert_eq!(restored.metrics().counts, agg.metrics().counts);
        assert_eq!(restored.metrics().totals, agg.metrics().totals);
        assert_eq!(restored.metrics().context_size, agg.metrics().context_size);
        assert_eq!(restored.metrics().tool_stats, agg.metrics().tool_stats);
        assert_eq!(restored.tokens_per_minute(), agg.tokens_per_minute());
        assert_eq!(restored.burn_samples(), agg.burn_samples());
        assert_eq!(
            restored.tool_frequency().serialize(),
            agg.tool_frequency().serialize()
        );
        assert_eq!(
            restored.activity().get_buckets(),
            agg.activity().get_buckets()
        );
        // The in-flight Read call survives the round trip
        assert_eq!(restored.in_flight_tools().len(), 1);
        assert_eq!(restored.in_flight_tools()[0].call_id, "t2");
    }

    #[test]
    fn test_restore_version_mismatch_starts_empty() {
        let mut blob = aggregator().serialize();
        blob["version"] = json!(999);
        let restored = EventAggregator::restore(PipelineConfig::default(), &blob);
        assert_eq!(restored.metrics().counts.total_events, 0);
    }

    #[test]
    fn test_restore_garbage_starts_empty() {
        let restored = EventAggregator::restore(PipelineConfig::default(), &json!("not a snapshot"));
        assert_eq!(restored.metrics().counts.total_events, 0);
    }

    #[test]
    fn test_restored_tasks_carried_over() {
        let mut agg = aggregator();
        agg.ingest(&tool_use_event(
            at(100),
            "t1",
            "TaskCreate",
            json!({"subject": "old task"}),
        ));
        let blob = agg.serialize();
        let restored = EventAggregator::restore(PipelineConfig::default(), &blob);
        assert!(restored.metrics().tasks["old task"].carried_over);
    }

    #[test]
    fn test_parse_plan_markdown_numbered_fallback() {
        let (title, steps) = parse_plan_markdown("# Plan\n1. first\n2. second\n");
        assert_eq!(title.as_deref(), Some("Plan"));
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].text, "second");
    }
}
