//! Canonical event model for agentlens
//!
//! Every supported provider log is normalized into [`CanonicalEvent`] before
//! anything downstream (classifier, aggregator, display) sees it. Provider
//! schemas never cross the normalizer boundary.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Provider** | A coding agent product whose logs we ingest (Claude Code, Codex, Gemini) |
//! | **CanonicalEvent** | One provider-agnostic occurrence: message, tool call, tool result, summary |
//! | **ContentBlock** | One piece of a message: text, thinking, tool_use, tool_result, image |
//! | **Correlation id** | Opaque token linking a tool_use to its eventual tool_result |
//! | **Sidechain** | A sub-conversation (spawned subagent) running alongside the main one |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Providers
// ============================================

/// Supported AI coding agent providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    ClaudeCode,
    Codex,
    Gemini,
}

impl Provider {
    /// Returns the display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::ClaudeCode => "Claude Code",
            Provider::Codex => "Codex",
            Provider::Gemini => "Gemini CLI",
        }
    }

    /// Returns the identifier used in config files and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::ClaudeCode => "claude_code",
            Provider::Codex => "codex",
            Provider::Gemini => "gemini",
        }
    }

    /// Guess the provider from a session file path.
    ///
    /// Returns `None` when no known provider directory appears in the path.
    pub fn detect_from_path(path: &std::path::Path) -> Option<Self> {
        let s = path.to_string_lossy();
        if s.contains(".claude/projects") || s.contains(".claude\\projects") {
            Some(Provider::ClaudeCode)
        } else if s.contains(".codex/sessions") || s.contains("rollout-") {
            Some(Provider::Codex)
        } else if s.contains(".gemini") {
            Some(Provider::Gemini)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude_code" | "claude" | "ClaudeCode" => Ok(Provider::ClaudeCode),
            "codex" | "Codex" => Ok(Provider::Codex),
            "gemini" | "Gemini" => Ok(Provider::Gemini),
            _ => Err(format!("unknown provider: {}", s)),
        }
    }
}

// ============================================
// Event kinds and roles
// ============================================

/// Kind of canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Prompt or tool-result carrier authored by the user side
    User,
    /// Reply, reasoning, or tool invocation from the model
    Assistant,
    /// A tool invocation (always carries a correlation id)
    ToolUse,
    /// A tool result (references a prior correlation id)
    ToolResult,
    /// Compaction/summarization marker
    Summary,
    /// Infrastructure or context injection
    System,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::User => "user",
            EventKind::Assistant => "assistant",
            EventKind::ToolUse => "tool_use",
            EventKind::ToolResult => "tool_result",
            EventKind::Summary => "summary",
            EventKind::System => "system",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EventKind::User),
            "assistant" => Ok(EventKind::Assistant),
            "tool_use" => Ok(EventKind::ToolUse),
            "tool_result" => Ok(EventKind::ToolResult),
            "summary" => Ok(EventKind::Summary),
            "system" => Ok(EventKind::System),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

/// Role of the message carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

// ============================================
// Token usage
// ============================================

/// Token usage reported by a provider for one assistant turn.
///
/// Providers spell these fields differently; serde aliases accept the common
/// variants so normalizers can deserialize usage payloads directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, alias = "inputTokens", alias = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "outputTokens", alias = "completion_tokens")]
    pub output_tokens: u64,
    #[serde(
        default,
        alias = "cacheCreationInputTokens",
        alias = "cache_creation_input_tokens"
    )]
    pub cache_write_tokens: u64,
    #[serde(
        default,
        alias = "cacheReadInputTokens",
        alias = "cache_read_input_tokens",
        alias = "cached_input_tokens"
    )]
    pub cache_read_tokens: u64,
    /// Reported cost in USD, when the provider includes one
    #[serde(default, alias = "costUSD", alias = "cost_usd")]
    pub cost_usd: Option<f64>,
}

impl TokenUsage {
    /// Total tokens across all four categories.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }

    /// True when every category is zero and no cost was reported.
    pub fn is_empty(&self) -> bool {
        self.total() == 0 && self.cost_usd.is_none()
    }
}

// ============================================
// Content blocks
// ============================================

/// One piece of canonical message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        /// Correlation id linking to the eventual tool_result
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        /// Correlation id of the tool_use this result answers
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        /// Media type, e.g. "image/png"; payload bytes are never carried
        media_type: String,
    },
}

impl ContentBlock {
    /// Returns the text of a `Text` or `Thinking` block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } | ContentBlock::Thinking { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }
}

// ============================================
// Canonical events
// ============================================

/// The message payload of a canonical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,
    /// Most recently observed model id at emission time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token usage, when the raw event reported any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
}

impl CanonicalMessage {
    /// All text carried by `Text` blocks, joined with newlines.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    /// True when any block is a tool invocation.
    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(ContentBlock::is_tool_use)
    }
}

/// The unified, provider-agnostic representation of one session occurrence.
///
/// Invariant: every `tool_use` block carries a stable correlation id; a
/// `tool_result` block referencing that id logically follows it in the
/// per-source event order (not necessarily contiguously).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub message: CanonicalMessage,
    /// True when this event belongs to a sub-conversation (spawned subagent)
    #[serde(default)]
    pub is_sidechain: bool,
    /// The provider's raw type tag, kept for infrastructure-noise detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_type: Option<String>,
}

impl CanonicalEvent {
    /// Convenience constructor used by normalizers.
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>, message: CanonicalMessage) -> Self {
        Self {
            kind,
            timestamp,
            message,
            is_sidechain: false,
            raw_type: None,
        }
    }

    /// First tool_use block, if any.
    pub fn tool_use(&self) -> Option<(&str, &str, &serde_json::Value)> {
        self.message.content.iter().find_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }

    /// First tool_result block, if any.
    pub fn tool_result(&self) -> Option<(&str, &str, bool)> {
        self.message.content.iter().find_map(|b| match b {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id.as_str(), content.as_str(), *is_error)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        for p in [Provider::ClaudeCode, Provider::Codex, Provider::Gemini] {
            let parsed: Provider = p.as_str().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn test_detect_from_path() {
        let p = std::path::Path::new("/home/u/.claude/projects/-home-u-dev/abc.jsonl");
        assert_eq!(Provider::detect_from_path(p), Some(Provider::ClaudeCode));

        let p = std::path::Path::new("/home/u/.codex/sessions/2026/01/05/rollout-x.jsonl");
        assert_eq!(Provider::detect_from_path(p), Some(Provider::Codex));

        let p = std::path::Path::new("/tmp/random.jsonl");
        assert_eq!(Provider::detect_from_path(p), None);
    }

    #[test]
    fn test_usage_aliases() {
        let u: TokenUsage = serde_json::from_str(
            r#"{"input_tokens":10,"output_tokens":5,"cacheReadInputTokens":7}"#,
        )
        .unwrap();
        assert_eq!(u.input_tokens, 10);
        assert_eq!(u.cache_read_tokens, 7);
        assert_eq!(u.total(), 22);
    }

    #[test]
    fn test_message_text_joins_text_blocks_only() {
        let msg = CanonicalMessage {
            role: Role::Assistant,
            model: None,
            usage: None,
            content: vec![
                ContentBlock::Text {
                    text: "a".to_string(),
                },
                ContentBlock::Thinking {
                    text: "hidden".to_string(),
                },
                ContentBlock::Text {
                    text: "b".to_string(),
                },
            ],
        };
        assert_eq!(msg.text(), "a\nb");
        assert!(!msg.has_tool_use());
    }
}
