//! Normalizer trait abstraction and shared conversion helpers
//!
//! All provider normalizers implement [`ProviderNormalizer`] to provide a
//! unified interface for converting raw log objects into canonical events.
//!
//! ## Design Principles
//!
//! 1. **Closed dispatch**: the normalizer is selected once at session start
//!    by provider identifier; no schema sniffing in the hot path
//! 2. **Resilience**: unrecognized raw shapes convert to zero events, never
//!    to an error that unwinds the ingestion loop
//! 3. **Bounded state**: the pending-call correlation table has a hard cap
//!    with oldest-eviction, so memory stays bounded regardless of session
//!    length

use crate::event::{CanonicalEvent, Provider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================
// Pending call correlation
// ============================================

/// Transient correlation record for an unresolved tool invocation.
///
/// Created when a `tool_use`/"begin" raw event is seen, consumed when the
/// matching "end"/`tool_result` arrives. Orphaned begins stay here and are
/// reported as in-flight rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCall {
    pub call_id: String,
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    pub arguments: Value,
}

/// Correlation table of pending calls, bounded at `capacity`.
///
/// Insertion order doubles as age order: when a brand-new call arrives at
/// capacity, the oldest unresolved call is dropped with a warning.
#[derive(Debug, Default)]
pub struct PendingCalls {
    capacity: usize,
    calls: HashMap<String, PendingCall>,
    /// Insertion order, oldest first
    order: Vec<String>,
}

impl PendingCalls {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            calls: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a pending call. Re-registering an id refreshes the record
    /// without consuming capacity twice.
    pub fn insert(&mut self, call: PendingCall) {
        if self.calls.contains_key(&call.call_id) {
            self.calls.insert(call.call_id.clone(), call);
            return;
        }

        if self.calls.len() >= self.capacity {
            if let Some(oldest) = (!self.order.is_empty()).then(|| self.order.remove(0)) {
                self.calls.remove(&oldest);
                tracing::warn!(
                    call_id = %oldest,
                    capacity = self.capacity,
                    "pending-call table full, dropping oldest unresolved call"
                );
            }
        }

        self.order.push(call.call_id.clone());
        self.calls.insert(call.call_id.clone(), call);
    }

    /// Look at the call with this id without resolving it.
    pub fn get(&self, call_id: &str) -> Option<&PendingCall> {
        self.calls.get(call_id)
    }

    /// Remove and return the call with this id, if still pending.
    pub fn take(&mut self, call_id: &str) -> Option<PendingCall> {
        let call = self.calls.remove(call_id)?;
        if let Some(pos) = self.order.iter().position(|id| id == call_id) {
            self.order.remove(pos);
        }
        Some(call)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// All unresolved calls, oldest first.
    pub fn in_flight(&self) -> Vec<PendingCall> {
        self.order
            .iter()
            .filter_map(|id| self.calls.get(id).cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.order.clear();
    }
}

// ============================================
// Normalizer trait
// ============================================

/// Trait implemented by all provider normalizers.
///
/// Each supported provider (Claude Code, Codex, Gemini) has one stateful
/// normalizer holding whatever per-session state asynchronous call pairing
/// and model tracking require.
pub trait ProviderNormalizer: Send {
    /// Which provider this normalizer handles
    fn provider(&self) -> Provider;

    /// Convert one raw object into zero or more canonical events.
    ///
    /// Unrecognized shapes return an empty vector; conversion never fails.
    fn convert(&mut self, raw: &Value) -> Vec<CanonicalEvent>;

    /// Clear all per-session state; required when switching the input file
    /// without discarding the aggregator.
    fn reset(&mut self);

    /// Unresolved tool calls (begins with no matching end), oldest first.
    fn in_flight(&self) -> Vec<PendingCall>;

    /// The most recently observed model identifier, if any.
    fn current_model(&self) -> Option<&str>;
}

/// Create the normalizer for a provider.
pub fn create_normalizer(provider: Provider, max_pending_calls: usize) -> Box<dyn ProviderNormalizer> {
    match provider {
        Provider::ClaudeCode => Box::new(super::normalizers::ClaudeCodeNormalizer::new(
            max_pending_calls,
        )),
        Provider::Codex => Box::new(super::normalizers::CodexNormalizer::new(max_pending_calls)),
        Provider::Gemini => Box::new(super::normalizers::GeminiNormalizer::new(max_pending_calls)),
    }
}

// ============================================
// Shared conversion helpers
// ============================================

/// Fallback display string for summary events with no provided summary.
pub const GENERIC_SUMMARY: &str = "Conversation compacted";

/// Normalize a provider's tool spelling to the canonical capitalization
/// scheme (`Bash`, `Read`, `WebSearch`, ...).
///
/// Known spellings map through a fixed table; anything else is converted
/// from snake_case to PascalCase so all providers land in one scheme.
pub fn canonical_tool_name(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "bash" | "shell" | "local_shell" | "exec" | "exec_command" | "run_shell_command"
        | "run_terminal_cmd" | "terminal" => "Bash".to_string(),
        "read" | "read_file" | "view" | "cat" | "read_many_files" => "Read".to_string(),
        "write" | "write_file" | "create_file" => "Write".to_string(),
        "edit" | "edit_file" | "apply_patch" | "str_replace" | "replace" => "Edit".to_string(),
        "grep" | "search_file_content" | "grep_search" => "Grep".to_string(),
        "glob" | "find_files" => "Glob".to_string(),
        "ls" | "list_directory" => "Ls".to_string(),
        "web_search" | "websearch" | "google_web_search" => "WebSearch".to_string(),
        "web_fetch" | "webfetch" | "fetch" | "http_get" => "WebFetch".to_string(),
        "task" | "agent" | "spawn_agent" | "dispatch_agent" => "Task".to_string(),
        _ => pascal_case(raw),
    }
}

/// Convert `snake_case`/`kebab-case` to PascalCase; already-Pascal names
/// pass through unchanged.
fn pascal_case(raw: &str) -> String {
    raw.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Recover a structured argument payload.
///
/// Providers that report tool arguments as a serialized string sometimes
/// emit truncated or otherwise invalid JSON; in that case the payload is
/// wrapped as a single raw string field instead of failing conversion.
pub fn recover_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }))
}

/// Join independent text fragments with a single newline.
///
/// Returns `None` when the joined result trims to empty, so callers can
/// suppress the canonical event entirely.
pub fn join_text_parts<'a, I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = parts.into_iter().collect::<Vec<_>>().join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Parse an RFC3339 timestamp, falling back to `fallback` when absent or
/// malformed.
pub fn parse_timestamp(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback)
}
