//! Gemini CLI JSONL normalizer
//!
//! Converts Gemini CLI streaming events into canonical events. The format
//! spells field names inconsistently between releases (snake_case and
//! camelCase coexist), so deserialization leans on serde aliases.
//!
//! Known event types:
//! - `session_start`: session initialization (captures the model)
//! - `user` / `user_message`: human input
//! - `text` / `content`: assistant output, possibly in fragments
//! - `thinking`: reasoning fragments
//! - `tool_call` / `function_call`: tool invocation (begin)
//! - `tool_result` / `function_result`: tool completion (end)
//! - `command_finished`: a completed shell command reported as ONE raw
//!   event; normalization must emit a `tool_use` + `tool_result` pair
//! - `session_end`: completion with aggregate usage

use crate::event::{
    CanonicalEvent, CanonicalMessage, ContentBlock, EventKind, Provider, Role, TokenUsage,
};
use crate::ingest::normalizer::{
    canonical_tool_name, join_text_parts, parse_timestamp, PendingCall, PendingCalls,
    ProviderNormalizer, GENERIC_SUMMARY,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawRecord {
    #[serde(rename = "type")]
    event_type: Option<String>,
    timestamp: Option<String>,
    model: Option<String>,
    text: Option<String>,
    content: Option<Value>,
    message: Option<String>,
    #[serde(alias = "isPartial")]
    partial: Option<bool>,

    // Tool call fields
    #[serde(alias = "callId", alias = "call_id")]
    id: Option<String>,
    #[serde(alias = "tool", alias = "function")]
    name: Option<String>,
    #[serde(alias = "args", alias = "arguments")]
    input: Option<Value>,
    #[serde(alias = "result")]
    output: Option<Value>,
    #[serde(alias = "ok")]
    success: Option<bool>,

    // command_finished fields
    command: Option<String>,
    #[serde(alias = "exitCode")]
    exit_code: Option<i64>,

    // session_end fields
    #[serde(alias = "tokenUsage")]
    usage: Option<TokenUsage>,
}

// ============================================
// Normalizer
// ============================================

/// Stateful normalizer for Gemini CLI session logs.
pub struct GeminiNormalizer {
    model: Option<String>,
    pending: PendingCalls,
    last_timestamp: DateTime<Utc>,
}

impl GeminiNormalizer {
    pub fn new(max_pending_calls: usize) -> Self {
        Self {
            model: None,
            pending: PendingCalls::new(max_pending_calls),
            last_timestamp: Utc::now(),
        }
    }

    fn text_of(record: &RawRecord) -> Option<String> {
        if let Some(text) = &record.text {
            return join_text_parts([text.as_str()]);
        }
        match &record.content {
            Some(Value::String(s)) => join_text_parts([s.as_str()]),
            Some(Value::Array(parts)) => {
                // Fragment arrays hold plain strings or {text} objects
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| {
                        p.as_str()
                            .or_else(|| p.get("text").and_then(Value::as_str))
                    })
                    .collect();
                join_text_parts(texts)
            }
            _ => record.message.as_deref().and_then(|s| join_text_parts([s])),
        }
    }

    fn assistant_text(&self, text: String, thinking: bool, ts: DateTime<Utc>) -> CanonicalEvent {
        let block = if thinking {
            ContentBlock::Thinking { text }
        } else {
            ContentBlock::Text { text }
        };
        CanonicalEvent::new(
            EventKind::Assistant,
            ts,
            CanonicalMessage {
                role: Role::Assistant,
                model: self.model.clone(),
                usage: None,
                content: vec![block],
            },
        )
    }

    fn emit_tool_use(
        &mut self,
        call_id: String,
        name: String,
        input: Value,
        ts: DateTime<Utc>,
    ) -> CanonicalEvent {
        self.pending.insert(PendingCall {
            call_id: call_id.clone(),
            tool_name: name.clone(),
            started_at: ts,
            arguments: input.clone(),
        });
        CanonicalEvent::new(
            EventKind::ToolUse,
            ts,
            CanonicalMessage {
                role: Role::Assistant,
                model: self.model.clone(),
                usage: None,
                content: vec![ContentBlock::ToolUse {
                    id: call_id,
                    name,
                    input,
                }],
            },
        )
    }

    /// Emit a tool result, synthesizing the missing `tool_use` when the
    /// call id was never registered (orphaned end).
    fn emit_tool_result(
        &mut self,
        call_id: String,
        content: String,
        is_error: bool,
        ts: DateTime<Utc>,
    ) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();

        if self.pending.take(&call_id).is_none() {
            tracing::debug!(call_id = %call_id, "tool result with no matching call");
            events.push(CanonicalEvent::new(
                EventKind::ToolUse,
                ts,
                CanonicalMessage {
                    role: Role::Assistant,
                    model: self.model.clone(),
                    usage: None,
                    content: vec![ContentBlock::ToolUse {
                        id: call_id.clone(),
                        name: "Unknown".to_string(),
                        input: serde_json::json!({}),
                    }],
                },
            ));
        }

        events.push(CanonicalEvent::new(
            EventKind::ToolResult,
            ts,
            CanonicalMessage {
                role: Role::Tool,
                model: None,
                usage: None,
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: call_id,
                    content,
                    is_error,
                }],
            },
        ));
        events
    }
}

impl ProviderNormalizer for GeminiNormalizer {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn convert(&mut self, raw: &Value) -> Vec<CanonicalEvent> {
        let record: RawRecord = match serde_json::from_value(raw.clone()) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "unrecognized record shape");
                return Vec::new();
            }
        };

        let ts = parse_timestamp(record.timestamp.as_deref(), self.last_timestamp);
        self.last_timestamp = ts;

        match record.event_type.as_deref().unwrap_or("unknown") {
            "session_start" | "sessionStart" => {
                // Header event: captures the model, emits nothing
                if record.model.is_some() {
                    self.model = record.model;
                }
                Vec::new()
            }

            "config" | "model_changed" => {
                // Mid-stream context update
                if record.model.is_some() {
                    self.model = record.model;
                }
                Vec::new()
            }

            "user" | "user_message" => match Self::text_of(&record) {
                Some(text) => vec![CanonicalEvent::new(
                    EventKind::User,
                    ts,
                    CanonicalMessage {
                        role: Role::User,
                        model: None,
                        usage: None,
                        content: vec![ContentBlock::Text { text }],
                    },
                )],
                None => Vec::new(),
            },

            "text" | "content" => {
                // Partial chunks are re-sent in full later; skip them
                if record.partial.unwrap_or(false) {
                    return Vec::new();
                }
                match Self::text_of(&record) {
                    Some(text) => vec![self.assistant_text(text, false, ts)],
                    None => Vec::new(),
                }
            }

            "thinking" => match Self::text_of(&record) {
                Some(text) => vec![self.assistant_text(text, true, ts)],
                None => Vec::new(),
            },

            "tool_call" | "toolCall" | "function_call" => {
                let call_id = record
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let name = canonical_tool_name(record.name.as_deref().unwrap_or("unknown"));
                let input = match record.input {
                    Some(Value::String(s)) => crate::ingest::normalizer::recover_arguments(&s),
                    Some(v) => v,
                    None => Value::Object(serde_json::Map::new()),
                };
                vec![self.emit_tool_use(call_id, name, input, ts)]
            }

            "tool_result" | "toolResult" | "function_result" => {
                let call_id = record
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let content = match record.output {
                    Some(Value::String(s)) => s,
                    Some(v) => v.to_string(),
                    None => String::new(),
                };
                let is_error = !record.success.unwrap_or(true);
                self.emit_tool_result(call_id, content, is_error, ts)
            }

            "command_finished" | "commandFinished" => {
                // One raw event describing a whole shell execution: emit the
                // tool_use and its tool_result as two canonical events,
                // never merged into one.
                let call_id = record
                    .id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let input = serde_json::json!({ "command": record.command });
                let use_event = self.emit_tool_use(call_id.clone(), "Bash".to_string(), input, ts);

                let content = match record.output {
                    Some(Value::String(s)) => s,
                    Some(v) => v.to_string(),
                    None => String::new(),
                };
                let is_error = record.exit_code.map(|c| c != 0).unwrap_or(false);

                let mut events = vec![use_event];
                events.extend(self.emit_tool_result(call_id, content, is_error, ts));
                events
            }

            "compaction" | "summary" => {
                let text = Self::text_of(&record).unwrap_or_else(|| GENERIC_SUMMARY.to_string());
                let mut event = CanonicalEvent::new(
                    EventKind::Summary,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: None,
                        usage: None,
                        content: vec![ContentBlock::Text { text }],
                    },
                );
                event.raw_type = Some("compaction".to_string());
                vec![event]
            }

            "session_end" | "sessionEnd" => {
                let mut event = CanonicalEvent::new(
                    EventKind::System,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: self.model.clone(),
                        usage: record.usage.filter(|u| !u.is_empty()),
                        content: Vec::new(),
                    },
                );
                event.raw_type = Some("session_end".to_string());
                vec![event]
            }

            other => {
                tracing::debug!(event_type = other, "dropping unknown event type");
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        self.model = None;
        self.pending.clear();
        self.last_timestamp = Utc::now();
    }

    fn in_flight(&self) -> Vec<PendingCall> {
        self.pending.in_flight()
    }

    fn current_model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}
