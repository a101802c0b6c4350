//! Codex CLI rollout JSONL normalizer
//!
//! Converts raw records from `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`
//! into canonical events. Every line is an envelope of
//! `{timestamp, type, payload}`; the interesting grammar lives one level
//! down in the payload.
//!
//! Tool interactions arrive in two distinct shapes:
//!
//! - `response_item` records with `function_call` / `function_call_output`
//!   payloads, paired asynchronously by `call_id` (arguments arrive as a
//!   serialized string that may be truncated mid-stream)
//! - `event_msg` records with `exec_command_begin` / `exec_command_end`
//!   payloads for shell executions, also paired by `call_id`
//!
//! `user_message`, `agent_message`, and `agent_reasoning` event_msg payloads
//! duplicate their `response_item` counterparts and are skipped.

use crate::event::{
    CanonicalEvent, CanonicalMessage, ContentBlock, EventKind, Provider, Role, TokenUsage,
};
use crate::ingest::normalizer::{
    canonical_tool_name, join_text_parts, parse_timestamp, recover_arguments, PendingCall,
    PendingCalls, ProviderNormalizer, GENERIC_SUMMARY,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Top-level event container for Codex JSONL records.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEnvelope {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    payload: Value,
}

/// Session metadata payload (first record in file).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SessionMetaPayload {
    cwd: Option<String>,
    model: Option<String>,
}

/// Turn context payload; updates header state mid-stream.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TurnContextPayload {
    cwd: Option<String>,
    model: Option<String>,
}

/// Response item payload subtypes.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseItemPayload {
    #[serde(rename = "type")]
    item_type: Option<String>,
    role: Option<String>,
    content: Option<Vec<RawContentPart>>,
    summary: Option<Vec<RawContentPart>>,
    name: Option<String>,
    arguments: Option<String>,
    call_id: Option<String>,
    output: Option<Value>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
enum RawContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "summary_text")]
    SummaryText { text: String },
    #[serde(other)]
    Unknown,
}

impl RawContentPart {
    fn text(&self) -> Option<&str> {
        match self {
            RawContentPart::InputText { text }
            | RawContentPart::OutputText { text }
            | RawContentPart::Text { text }
            | RawContentPart::SummaryText { text } => Some(text),
            RawContentPart::Unknown => None,
        }
    }
}

/// Event message payload subtypes.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EventMsgPayload {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    message: Option<String>,
    call_id: Option<String>,
    command: Option<Value>,
    cwd: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: Option<i64>,
    info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TokenInfo {
    last_token_usage: Option<TokenUsage>,
}

// ============================================
// Normalizer
// ============================================

/// Stateful normalizer for Codex CLI session logs.
pub struct CodexNormalizer {
    model: Option<String>,
    cwd: Option<String>,
    pending: PendingCalls,
    last_timestamp: DateTime<Utc>,
}

impl CodexNormalizer {
    pub fn new(max_pending_calls: usize) -> Self {
        Self {
            model: None,
            cwd: None,
            pending: PendingCalls::new(max_pending_calls),
            last_timestamp: Utc::now(),
        }
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    fn convert_response_item(&mut self, payload: Value, ts: DateTime<Utc>) -> Vec<CanonicalEvent> {
        let item: ResponseItemPayload = serde_json::from_value(payload).unwrap_or_default();

        match item.item_type.as_deref().unwrap_or("unknown") {
            "message" => {
                let parts = item.content.unwrap_or_default();
                let Some(text) = join_text_parts(parts.iter().filter_map(RawContentPart::text))
                else {
                    return Vec::new();
                };
                let (kind, role, model) = match item.role.as_deref() {
                    Some("assistant") => (EventKind::Assistant, Role::Assistant, self.model.clone()),
                    _ => (EventKind::User, Role::User, None),
                };
                vec![CanonicalEvent::new(
                    kind,
                    ts,
                    CanonicalMessage {
                        role,
                        model,
                        usage: None,
                        content: vec![ContentBlock::Text { text }],
                    },
                )]
            }
            "reasoning" => {
                let parts = item.summary.or(item.content).unwrap_or_default();
                let Some(text) = join_text_parts(parts.iter().filter_map(RawContentPart::text))
                else {
                    return Vec::new();
                };
                vec![CanonicalEvent::new(
                    EventKind::Assistant,
                    ts,
                    CanonicalMessage {
                        role: Role::Assistant,
                        model: self.model.clone(),
                        usage: None,
                        content: vec![ContentBlock::Thinking { text }],
                    },
                )]
            }
            "function_call" => {
                let call_id = item
                    .call_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let name = canonical_tool_name(item.name.as_deref().unwrap_or("unknown"));
                let input = recover_arguments(item.arguments.as_deref().unwrap_or(""));

                self.pending.insert(PendingCall {
                    call_id: call_id.clone(),
                    tool_name: name.clone(),
                    started_at: ts,
                    arguments: input.clone(),
                });

                vec![CanonicalEvent::new(
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
                )]
            }
            "function_call_output" => {
                let call_id = item.call_id.unwrap_or_default();
                let (content, is_error) = parse_call_output(item.output.as_ref());
                self.emit_tool_result(&call_id, content, is_error, ts)
            }
            other => {
                tracing::debug!(item_type = other, "dropping unknown response item");
                Vec::new()
            }
        }
    }

    fn convert_event_msg(&mut self, payload: Value, ts: DateTime<Utc>) -> Vec<CanonicalEvent> {
        let msg: EventMsgPayload = serde_json::from_value(payload).unwrap_or_default();

        match msg.msg_type.as_deref().unwrap_or("unknown") {
            // Duplicates of response_item records
            "user_message" | "agent_message" | "agent_reasoning" => Vec::new(),

            "exec_command_begin" => {
                let call_id = msg
                    .call_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let input = serde_json::json!({
                    "command": msg.command.unwrap_or(Value::Null),
                    "cwd": msg.cwd,
                });

                self.pending.insert(PendingCall {
                    call_id: call_id.clone(),
                    tool_name: "Bash".to_string(),
                    started_at: ts,
                    arguments: input.clone(),
                });

                vec![CanonicalEvent::new(
                    EventKind::ToolUse,
                    ts,
                    CanonicalMessage {
                        role: Role::Assistant,
                        model: self.model.clone(),
                        usage: None,
                        content: vec![ContentBlock::ToolUse {
                            id: call_id,
                            name: "Bash".to_string(),
                            input,
                        }],
                    },
                )]
            }

            "exec_command_end" => {
                let call_id = msg.call_id.unwrap_or_default();
                let exit_code = msg.exit_code.unwrap_or(0);
                let stdout = msg.stdout.unwrap_or_default();
                let stderr = msg.stderr.unwrap_or_default();
                let content = if exit_code == 0 { stdout } else { stderr };
                self.emit_tool_result(&call_id, content, exit_code != 0, ts)
            }

            "token_count" => {
                let usage = msg.info.and_then(|i| i.last_token_usage);
                let mut event = CanonicalEvent::new(
                    EventKind::System,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: self.model.clone(),
                        usage,
                        content: Vec::new(),
                    },
                );
                event.raw_type = Some("token_count".to_string());
                vec![event]
            }

            "compacted" => {
                let text = msg
                    .message
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_SUMMARY.to_string());
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
                event.raw_type = Some("compacted".to_string());
                vec![event]
            }

            "error" | "turn_aborted" => {
                let Some(text) = msg.message.and_then(|s| join_text_parts([s.as_str()])) else {
                    return Vec::new();
                };
                let mut event = CanonicalEvent::new(
                    EventKind::System,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: None,
                        usage: None,
                        content: vec![ContentBlock::Text { text }],
                    },
                );
                event.raw_type = Some("error".to_string());
                vec![event]
            }

            other => {
                tracing::debug!(msg_type = other, "dropping unknown event_msg");
                Vec::new()
            }
        }
    }

    /// Emit a tool result, synthesizing the missing `tool_use` when the
    /// call id was never registered (orphaned end).
    fn emit_tool_result(
        &mut self,
        call_id: &str,
        content: String,
        is_error: bool,
        ts: DateTime<Utc>,
    ) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        let call_id = if call_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            call_id.to_string()
        };

        if self.pending.take(&call_id).is_none() {
            tracing::debug!(call_id = %call_id, "end event with no matching begin");
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

impl ProviderNormalizer for CodexNormalizer {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    fn convert(&mut self, raw: &Value) -> Vec<CanonicalEvent> {
        let envelope: RawEnvelope = match serde_json::from_value(raw.clone()) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "unrecognized record shape");
                return Vec::new();
            }
        };

        let ts = parse_timestamp(envelope.timestamp.as_deref(), self.last_timestamp);
        self.last_timestamp = ts;

        match envelope.event_type.as_deref().unwrap_or("unknown") {
            "session_meta" => {
                let meta: SessionMetaPayload =
                    serde_json::from_value(envelope.payload).unwrap_or_default();
                if meta.cwd.is_some() {
                    self.cwd = meta.cwd;
                }
                if meta.model.is_some() {
                    self.model = meta.model;
                }
                Vec::new()
            }
            "turn_context" => {
                // Context update: applies to all later emissions until
                // overwritten.
                let ctx: TurnContextPayload =
                    serde_json::from_value(envelope.payload).unwrap_or_default();
                if ctx.cwd.is_some() {
                    self.cwd = ctx.cwd;
                }
                if ctx.model.is_some() {
                    self.model = ctx.model;
                }
                let mut event = CanonicalEvent::new(
                    EventKind::System,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: self.model.clone(),
                        usage: None,
                        content: Vec::new(),
                    },
                );
                event.raw_type = Some("turn_context".to_string());
                vec![event]
            }
            "response_item" => self.convert_response_item(envelope.payload, ts),
            "event_msg" => self.convert_event_msg(envelope.payload, ts),
            other => {
                tracing::debug!(event_type = other, "dropping unknown event type");
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        self.model = None;
        self.cwd = None;
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

/// Extract display text and error flag from a `function_call_output` payload.
///
/// The output is usually a string that itself may contain a JSON object of
/// `{"output": ..., "metadata": {"exit_code": ...}}`.
fn parse_call_output(output: Option<&Value>) -> (String, bool) {
    let Some(output) = output else {
        return (String::new(), false);
    };

    let parsed = match output {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or(Value::String(s.clone())),
        v => v.clone(),
    };

    match &parsed {
        Value::String(s) => (s.clone(), false),
        Value::Object(obj) => {
            let text = obj
                .get("output")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| parsed.to_string());
            let is_error = obj
                .get("metadata")
                .and_then(|m| m.get("exit_code"))
                .and_then(Value::as_i64)
                .map(|code| code != 0)
                .unwrap_or(false);
            (text, is_error)
        }
        v => (v.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn converter() -> CodexNormalizer {
        CodexNormalizer::new(64)
    }

    #[test]
    fn test_turn_context_sets_model() {
        let mut n = converter();
        let events = n.convert(&json!({
            "timestamp": "2026-01-05T09:00:00Z",
            "type": "turn_context",
            "payload": {"cwd": "/work", "model": "gpt-5"}
        }));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_type.as_deref(), Some("turn_context"));
        assert_eq!(n.current_model(), Some("gpt-5"));
        assert_eq!(n.cwd(), Some("/work"));
    }

    #[test]
    fn test_model_attribution_applies_to_later_events() {
        let mut n = converter();
        n.convert(&json!({
            "type": "turn_context",
            "payload": {"model": "gpt-5"}
        }));
        let events = n.convert(&json!({
            "type": "response_item",
            "payload": {"type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": "done"}]}
        }));
        assert_eq!(events[0].message.model.as_deref(), Some("gpt-5"));
    }

    #[test]
    fn test_message_fragments_join() {
        let mut n = converter();
        let events = n.convert(&json!({
            "type": "response_item",
            "payload": {"type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": "a"},
                                    {"type": "output_text", "text": "b"}]}
        }));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message.text(), "a\nb");
    }

    #[test]
    fn test_reasoning_becomes_thinking() {
        let mut n = converter();
        let events = n.convert(&json!({
            "type": "response_item",
            "payload": {"type": "reasoning",
                        "summary": [{"type": "summary_text", "text": "thinking hard"}]}
        }));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].message.content[0],
            ContentBlock::Thinking { .. }
        ));
    }

    #[test]
    fn test_function_call_pairing() {
        let mut n = converter();
        let uses = n.convert(&json!({
            "timestamp": "2026-01-05T09:00:01Z",
            "type": "response_item",
            "payload": {"type": "function_call", "name": "shell",
                        "arguments": "{\"command\":[\"ls\"]}", "call_id": "call_1"}
        }));
        assert_eq!(uses.len(), 1);
        let (id, name, input) = uses[0].tool_use().unwrap();
        assert_eq!(id, "call_1");
        assert_eq!(name, "Bash");
        assert_eq!(input["command"][0], "ls");
        assert_eq!(n.in_flight().len(), 1);

        let results = n.convert(&json!({
            "timestamp": "2026-01-05T09:00:02Z",
            "type": "response_item",
            "payload": {"type": "function_call_output", "call_id": "call_1",
                        "output": "{\"output\":\"file.txt\",\"metadata\":{\"exit_code\":0}}"}
        }));
        assert_eq!(results.len(), 1);
        let (id, content, is_error) = results[0].tool_result().unwrap();
        assert_eq!(id, "call_1");
        assert_eq!(content, "file.txt");
        assert!(!is_error);
        assert!(n.in_flight().is_empty());
    }

    #[test]
    fn test_truncated_arguments_recovered_as_raw() {
        let mut n = converter();
        let events = n.convert(&json!({
            "type": "response_item",
            "payload": {"type": "function_call", "name": "shell",
                        "arguments": "{\"command\": [\"ls", "call_id": "call_2"}
        }));
        let (_, _, input) = events[0].tool_use().unwrap();
        assert_eq!(input["raw"], "{\"command\": [\"ls");
    }

    #[test]
    fn test_exec_command_begin_end_pair() {
        let mut n = converter();
        let begins = n.convert(&json!({
            "timestamp": "2026-01-05T09:00:03Z",
            "type": "event_msg",
            "payload": {"type": "exec_command_begin", "call_id": "exec_1",
                        "command": ["cargo", "test"], "cwd": "/work"}
        }));
        assert_eq!(begins.len(), 1);
        assert_eq!(begins[0].kind, EventKind::ToolUse);

        let ends = n.convert(&json!({
            "timestamp": "2026-01-05T09:00:09Z",
            "type": "event_msg",
            "payload": {"type": "exec_command_end", "call_id": "exec_1",
                        "stdout": "ok", "stderr": "", "exit_code": 0}
        }));
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].kind, EventKind::ToolResult);
        let (_, content, is_error) = ends[0].tool_result().unwrap();
        assert_eq!(content, "ok");
        assert!(!is_error);
    }

    #[test]
    fn test_orphaned_end_emits_pair() {
        let mut n = converter();
        let events = n.convert(&json!({
            "type": "event_msg",
            "payload": {"type": "exec_command_end", "call_id": "exec_x",
                        "stdout": "", "stderr": "boom", "exit_code": 1}
        }));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::ToolUse);
        let (id, name, input) = events[0].tool_use().unwrap();
        assert_eq!(id, "exec_x");
        assert_eq!(name, "Unknown");
        assert_eq!(input, &json!({}));
        let (_, content, is_error) = events[1].tool_result().unwrap();
        assert_eq!(content, "boom");
        assert!(is_error);
    }

    #[test]
    fn test_duplicate_event_msgs_skipped() {
        let mut n = converter();
        for t in ["user_message", "agent_message", "agent_reasoning"] {
            assert!(n
                .convert(&json!({
                    "type": "event_msg",
                    "payload": {"type": t, "message": "dup"}
                }))
                .is_empty());
        }
    }

    #[test]
    fn test_token_count_carries_usage() {
        let mut n = converter();
        let events = n.convert(&json!({
            "type": "event_msg",
            "payload": {"type": "token_count",
                        "info": {"last_token_usage": {"input_tokens": 500,
                                                      "output_tokens": 80,
                                                      "cached_input_tokens": 200}}}
        }));
        assert_eq!(events.len(), 1);
        let usage = events[0].message.usage.unwrap();
        assert_eq!(usage.input_tokens, 500);
        assert_eq!(usage.cache_read_tokens, 200);
        assert_eq!(events[0].raw_type.as_deref(), Some("token_count"));
    }

    #[test]
    fn test_compacted_becomes_summary() {
        let mut n = converter();
        let events = n.convert(&json!({
            "type": "event_msg",
            "payload": {"type": "compacted"}
        }));
        assert_eq!(events[0].kind, EventKind::Summary);
        assert_eq!(events[0].message.text(), GENERIC_SUMMARY);
    }
}
