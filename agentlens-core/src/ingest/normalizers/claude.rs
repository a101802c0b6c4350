//! Claude Code JSONL normalizer
//!
//! Converts raw records from `~/.claude/projects/[encoded-path]/*.jsonl`
//! into canonical events.
//!
//! # Error Handling
//!
//! The normalizer is designed to be resilient and recover from errors:
//!
//! - **Missing required fields**: Uses sensible defaults via `#[serde(default)]`.
//!   A missing `timestamp` falls back to the last seen timestamp.
//!
//! - **Empty content**: Text fragments that join to an empty string suppress
//!   the canonical event entirely.
//!
//! - **Unknown record types**: Converted to zero events rather than failing,
//!   since the log format grows new record kinds between CLI releases.
//!
//! - **Orphaned tool results**: A `tool_result` block whose id was never
//!   registered still emits a plausible `tool_use`/`tool_result` pair with
//!   empty arguments.

use crate::event::{
    CanonicalEvent, CanonicalMessage, ContentBlock, EventKind, Provider, Role, TokenUsage,
};
use crate::ingest::normalizer::{
    join_text_parts, parse_timestamp, PendingCall, PendingCalls, ProviderNormalizer,
    GENERIC_SUMMARY,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Record types that are pure infrastructure; surfaced as system events so
/// the classifier can count and hide them.
const INFRA_TYPES: &[&str] = &["file-history-snapshot", "queued-command", "progress"];

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Represents a single line from Claude Code JSONL.
///
/// Uses `#[serde(default)]` liberally to handle missing fields gracefully.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
    is_sidechain: Option<bool>,
    message: Option<RawMessage>,
    summary: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    role: Option<String>,
    model: Option<String>,
    content: Option<RawContent>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    // Catch-all for unknown block types
    #[serde(other)]
    Unknown,
}

/// Source information for an image content block.
///
/// The `data` field is intentionally omitted; it holds the full
/// base64-encoded image.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ImageSource {
    media_type: String,
}

// ============================================
// Normalizer
// ============================================

/// Stateful normalizer for Claude Code session logs.
pub struct ClaudeCodeNormalizer {
    /// Most recently observed real model id (synthetic markers excluded)
    model: Option<String>,
    /// Working directory captured from record headers
    cwd: Option<String>,
    pending: PendingCalls,
    last_timestamp: DateTime<Utc>,
}

impl ClaudeCodeNormalizer {
    pub fn new(max_pending_calls: usize) -> Self {
        Self {
            model: None,
            cwd: None,
            pending: PendingCalls::new(max_pending_calls),
            last_timestamp: Utc::now(),
        }
    }

    /// The working directory from the most recent record that carried one.
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    fn convert_assistant(&mut self, record: &RawRecord, ts: DateTime<Utc>) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        let Some(msg) = &record.message else {
            return events;
        };

        // Sticky model: a real model id applies to all later emissions until
        // overwritten; synthetic markers only tag their own record.
        let record_model = msg.model.clone();
        if let Some(model) = &record_model {
            if !model.starts_with('<') {
                self.model = Some(model.clone());
            }
        }
        let event_model = record_model.or_else(|| self.model.clone());

        let mut usage = msg.usage.filter(|u| !u.is_empty());
        let sidechain = record.is_sidechain.unwrap_or(false);

        let (texts, thinkings, tool_uses) = split_blocks(msg.content.as_ref());

        // Joined text/thinking becomes one assistant event; usage rides on
        // the first event emitted for this record.
        let mut content = Vec::new();
        if let Some(thinking) = join_text_parts(thinkings.iter().map(String::as_str)) {
            content.push(ContentBlock::Thinking { text: thinking });
        }
        if let Some(text) = join_text_parts(texts.iter().map(String::as_str)) {
            content.push(ContentBlock::Text { text });
        }
        if !content.is_empty() {
            let mut event = CanonicalEvent::new(
                EventKind::Assistant,
                ts,
                CanonicalMessage {
                    role: Role::Assistant,
                    model: event_model.clone(),
                    usage: usage.take(),
                    content,
                },
            );
            event.is_sidechain = sidechain;
            events.push(event);
        }

        for (id, name, input) in tool_uses {
            let tool_name = crate::ingest::normalizer::canonical_tool_name(&name);
            self.pending.insert(PendingCall {
                call_id: id.clone(),
                tool_name: tool_name.clone(),
                started_at: ts,
                arguments: input.clone(),
            });

            let mut event = CanonicalEvent::new(
                EventKind::ToolUse,
                ts,
                CanonicalMessage {
                    role: Role::Assistant,
                    model: event_model.clone(),
                    usage: usage.take(),
                    content: vec![ContentBlock::ToolUse {
                        id,
                        name: tool_name,
                        input,
                    }],
                },
            );
            event.is_sidechain = sidechain;
            events.push(event);
        }

        events
    }

    fn convert_user(&mut self, record: &RawRecord, ts: DateTime<Utc>) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        let Some(msg) = &record.message else {
            return events;
        };
        let sidechain = record.is_sidechain.unwrap_or(false);

        let (texts, _, _) = split_blocks(msg.content.as_ref());
        let mut content = Vec::new();
        if let Some(text) = join_text_parts(texts.iter().map(String::as_str)) {
            content.push(ContentBlock::Text { text });
        }
        if let Some(RawContent::Blocks(blocks)) = &msg.content {
            for block in blocks {
                if let RawBlock::Image { source } = block {
                    content.push(ContentBlock::Image {
                        media_type: source.media_type.clone(),
                    });
                }
            }
        }
        if !content.is_empty() {
            let mut event = CanonicalEvent::new(
                EventKind::User,
                ts,
                CanonicalMessage {
                    role: Role::User,
                    model: None,
                    usage: None,
                    content,
                },
            );
            event.is_sidechain = sidechain;
            events.push(event);
        }

        // Tool results ride on user records in this format
        if let Some(RawContent::Blocks(blocks)) = &msg.content {
            for block in blocks {
                if let RawBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } = block
                {
                    events.extend(self.emit_tool_result(
                        tool_use_id,
                        result_text(content),
                        *is_error,
                        ts,
                        sidechain,
                    ));
                }
            }
        }

        events
    }

    /// Emit a tool result, synthesizing the missing `tool_use` when the id
    /// was never registered (orphaned end).
    fn emit_tool_result(
        &mut self,
        tool_use_id: &str,
        content: String,
        is_error: bool,
        ts: DateTime<Utc>,
        sidechain: bool,
    ) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();

        if self.pending.take(tool_use_id).is_none() {
            tracing::debug!(call_id = %tool_use_id, "tool result with no matching call");
            let mut synthetic = CanonicalEvent::new(
                EventKind::ToolUse,
                ts,
                CanonicalMessage {
                    role: Role::Assistant,
                    model: self.model.clone(),
                    usage: None,
                    content: vec![ContentBlock::ToolUse {
                        id: tool_use_id.to_string(),
                        name: "Unknown".to_string(),
                        input: serde_json::json!({}),
                    }],
                },
            );
            synthetic.is_sidechain = sidechain;
            events.push(synthetic);
        }

        let mut event = CanonicalEvent::new(
            EventKind::ToolResult,
            ts,
            CanonicalMessage {
                role: Role::Tool,
                model: None,
                usage: None,
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.to_string(),
                    content,
                    is_error,
                }],
            },
        );
        event.is_sidechain = sidechain;
        events.push(event);
        events
    }
}

impl ProviderNormalizer for ClaudeCodeNormalizer {
    fn provider(&self) -> Provider {
        Provider::ClaudeCode
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

        if let Some(cwd) = &record.cwd {
            self.cwd = Some(cwd.clone());
        }

        let record_type = record.record_type.as_deref().unwrap_or("unknown");
        match record_type {
            "assistant" => self.convert_assistant(&record, ts),
            "user" => self.convert_user(&record, ts),
            "summary" => {
                let text = record
                    .summary
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(GENERIC_SUMMARY)
                    .to_string();
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
                event.raw_type = Some("summary".to_string());
                vec![event]
            }
            "system" => {
                let mut content = Vec::new();
                if let Some(text) = record
                    .content
                    .as_deref()
                    .and_then(|s| join_text_parts([s]))
                {
                    content.push(ContentBlock::Text { text });
                }
                let mut event = CanonicalEvent::new(
                    EventKind::System,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: None,
                        usage: None,
                        content,
                    },
                );
                event.is_sidechain = record.is_sidechain.unwrap_or(false);
                event.raw_type = Some("system".to_string());
                vec![event]
            }
            t if INFRA_TYPES.contains(&t) => {
                let mut event = CanonicalEvent::new(
                    EventKind::System,
                    ts,
                    CanonicalMessage {
                        role: Role::System,
                        model: None,
                        usage: None,
                        content: Vec::new(),
                    },
                );
                event.raw_type = Some(t.to_string());
                vec![event]
            }
            other => {
                tracing::debug!(record_type = other, "dropping unknown record type");
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

/// Partition raw content into text fragments, thinking fragments, and tool
/// invocations.
fn split_blocks(
    content: Option<&RawContent>,
) -> (Vec<String>, Vec<String>, Vec<(String, String, Value)>) {
    let mut texts = Vec::new();
    let mut thinkings = Vec::new();
    let mut tool_uses = Vec::new();

    match content {
        Some(RawContent::Text(text)) => texts.push(text.clone()),
        Some(RawContent::Blocks(blocks)) => {
            for block in blocks {
                match block {
                    RawBlock::Text { text } => texts.push(text.clone()),
                    RawBlock::Thinking { thinking } => thinkings.push(thinking.clone()),
                    RawBlock::ToolUse { id, name, input } => {
                        tool_uses.push((id.clone(), name.clone(), input.clone()))
                    }
                    _ => {}
                }
            }
        }
        None => {}
    }

    (texts, thinkings, tool_uses)
}

/// Render a tool result payload as display text.
fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(parts) => {
            // Result arrays hold {type: "text", text} fragments
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                content.to_string()
            } else {
                texts.join("\n")
            }
        }
        v => v.to_string(),
    }
}
