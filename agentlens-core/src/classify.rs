//! Noise classification for canonical events
//!
//! Pure functions, no hidden state. Classification happens after
//! normalization and before aggregation:
//!
//! - **Hard noise** is never displayed and never enters the timeline
//!   (sidechain events, infrastructure record types, synthetic models).
//! - **Soft noise** is retained but flagged so display surfaces can hide it.
//! - [`classify`] assigns the semantic message class used by timelines.
//! - [`should_merge`] decides whether consecutive display events collapse
//!   into one row.

use crate::event::{CanonicalEvent, ContentBlock, EventKind};
use serde::{Deserialize, Serialize};

/// Raw record types that are pure infrastructure, never conversation.
const INFRA_RECORD_TYPES: &[&str] = &[
    "file-history-snapshot",
    "queued-command",
    "progress",
    "rate_limits",
    "token_count",
    "turn_context",
];

/// Model ids carrying this prefix are synthesized by the CLI, not emitted by
/// a real model turn.
const SYNTHETIC_MODEL_PREFIX: &str = "<synthetic";

/// Marker embedded in user text when the prompt was relayed by a teammate
/// agent rather than typed by the human.
const TEAMMATE_MARKER: &str = "<teammate-message";

/// Semantic class of a display event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    User,
    Ai,
    System,
    Teammate,
    Compact,
}

impl MessageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClass::User => "user",
            MessageClass::Ai => "ai",
            MessageClass::System => "system",
            MessageClass::Teammate => "teammate",
            MessageClass::Compact => "compact",
        }
    }
}

/// Why an event was flagged as soft noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SoftNoiseReason {
    SystemReminder,
    CommandCaveat,
    EmptyToolOutput,
    Interrupted,
}

impl SoftNoiseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoftNoiseReason::SystemReminder => "system-reminder",
            SoftNoiseReason::CommandCaveat => "command-caveat",
            SoftNoiseReason::EmptyToolOutput => "empty-tool-output",
            SoftNoiseReason::Interrupted => "interrupted",
        }
    }
}

/// True when the event must never be displayed or recorded in the timeline.
///
/// Hard noise is still ingested by the aggregator for statistics.
pub fn is_hard_noise(event: &CanonicalEvent) -> bool {
    if event.is_sidechain {
        return true;
    }

    if let Some(raw_type) = &event.raw_type {
        if INFRA_RECORD_TYPES.contains(&raw_type.as_str()) {
            return true;
        }
    }

    if event.kind == EventKind::Assistant {
        if let Some(model) = &event.message.model {
            if model.starts_with(SYNTHETIC_MODEL_PREFIX) {
                return true;
            }
        }
    }

    false
}

/// Detect soft noise in the event's textual content, in priority order:
/// system-reminder markup, command-caveat phrasing, empty tool output,
/// interruption markers. Returns `None` for clean events.
pub fn soft_noise_reason(event: &CanonicalEvent) -> Option<SoftNoiseReason> {
    let text = all_text(event);

    if text.contains("<system-reminder>") {
        return Some(SoftNoiseReason::SystemReminder);
    }

    if text.trim_start().starts_with("Caveat: the messages below") {
        return Some(SoftNoiseReason::CommandCaveat);
    }

    for block in &event.message.content {
        if let ContentBlock::ToolResult { content, .. } = block {
            if content.trim().is_empty() {
                return Some(SoftNoiseReason::EmptyToolOutput);
            }
        }
    }

    if text.contains("[Request interrupted") {
        return Some(SoftNoiseReason::Interrupted);
    }

    None
}

/// Assign the semantic message class for display purposes.
pub fn classify(event: &CanonicalEvent) -> MessageClass {
    match event.kind {
        EventKind::User => {
            if all_text(event).contains(TEAMMATE_MARKER) {
                MessageClass::Teammate
            } else {
                MessageClass::User
            }
        }
        EventKind::Assistant | EventKind::ToolUse => MessageClass::Ai,
        EventKind::ToolResult => MessageClass::System,
        EventKind::Summary => MessageClass::Compact,
        EventKind::System => MessageClass::System,
    }
}

/// True only when `current` and `previous` are both plain-text assistant
/// turns: consecutive assistant events merge unless either one invokes a
/// tool.
pub fn should_merge(current: &CanonicalEvent, previous: Option<&CanonicalEvent>) -> bool {
    let Some(previous) = previous else {
        return false;
    };

    if current.kind != EventKind::Assistant || previous.kind != EventKind::Assistant {
        return false;
    }

    !current.message.has_tool_use() && !previous.message.has_tool_use()
}

/// All text and thinking content of the event, joined for marker scanning.
fn all_text(event: &CanonicalEvent) -> String {
    let parts: Vec<&str> = event
        .message
        .content
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect();
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CanonicalMessage, Role};
    use chrono::Utc;

    fn event(kind: EventKind, role: Role, content: Vec<ContentBlock>) -> CanonicalEvent {
        CanonicalEvent::new(
            kind,
            Utc::now(),
            CanonicalMessage {
                role,
                model: None,
                usage: None,
                content,
            },
        )
    }

    fn text_event(kind: EventKind, role: Role, text: &str) -> CanonicalEvent {
        event(
            kind,
            role,
            vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        )
    }

    #[test]
    fn test_sidechain_is_hard_noise_regardless_of_kind() {
        for kind in [EventKind::User, EventKind::Assistant, EventKind::Summary] {
            let mut e = text_event(kind, Role::User, "hello");
            e.is_sidechain = true;
            assert!(is_hard_noise(&e));
        }
    }

    #[test]
    fn test_infra_record_type_is_hard_noise() {
        let mut e = text_event(EventKind::System, Role::System, "");
        e.raw_type = Some("file-history-snapshot".to_string());
        assert!(is_hard_noise(&e));
    }

    #[test]
    fn test_synthetic_model_is_hard_noise() {
        let mut e = text_event(EventKind::Assistant, Role::Assistant, "ok");
        e.message.model = Some("<synthetic>".to_string());
        assert!(is_hard_noise(&e));

        e.message.model = Some("claude-opus-4".to_string());
        assert!(!is_hard_noise(&e));
    }

    #[test]
    fn test_empty_tool_output_is_soft_noise() {
        let e = event(
            EventKind::ToolResult,
            Role::Tool,
            vec![ContentBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: "".to_string(),
                is_error: false,
            }],
        );
        assert_eq!(
            soft_noise_reason(&e),
            Some(SoftNoiseReason::EmptyToolOutput)
        );
    }

    #[test]
    fn test_system_reminder_takes_priority() {
        let e = event(
            EventKind::User,
            Role::User,
            vec![
                ContentBlock::Text {
                    text: "<system-reminder>stuff</system-reminder>".to_string(),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: "".to_string(),
                    is_error: false,
                },
            ],
        );
        assert_eq!(soft_noise_reason(&e), Some(SoftNoiseReason::SystemReminder));
    }

    #[test]
    fn test_interruption_marker() {
        let e = text_event(EventKind::User, Role::User, "[Request interrupted by user]");
        assert_eq!(soft_noise_reason(&e), Some(SoftNoiseReason::Interrupted));
    }

    #[test]
    fn test_clean_event_has_no_soft_noise() {
        let e = text_event(EventKind::User, Role::User, "please fix the bug");
        assert_eq!(soft_noise_reason(&e), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&text_event(EventKind::User, Role::User, "hi")),
            MessageClass::User
        );
        assert_eq!(
            classify(&text_event(
                EventKind::User,
                Role::User,
                "<teammate-message from=\"lead\">go</teammate-message>"
            )),
            MessageClass::Teammate
        );
        assert_eq!(
            classify(&text_event(EventKind::Assistant, Role::Assistant, "ok")),
            MessageClass::Ai
        );
        assert_eq!(
            classify(&event(
                EventKind::ToolUse,
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "t".to_string(),
                    name: "Bash".to_string(),
                    input: serde_json::json!({}),
                }]
            )),
            MessageClass::Ai
        );
        assert_eq!(
            classify(&event(EventKind::ToolResult, Role::Tool, vec![])),
            MessageClass::System
        );
        assert_eq!(
            classify(&text_event(EventKind::Summary, Role::System, "compacted")),
            MessageClass::Compact
        );
    }

    #[test]
    fn test_should_merge_plain_assistant_turns() {
        let a = text_event(EventKind::Assistant, Role::Assistant, "first");
        let b = text_event(EventKind::Assistant, Role::Assistant, "second");
        assert!(should_merge(&b, Some(&a)));
        assert!(!should_merge(&b, None));
    }

    #[test]
    fn test_should_merge_rejects_tool_use() {
        let a = text_event(EventKind::Assistant, Role::Assistant, "first");
        let mut b = text_event(EventKind::Assistant, Role::Assistant, "second");
        b.message.content.push(ContentBlock::ToolUse {
            id: "t".to_string(),
            name: "Read".to_string(),
            input: serde_json::json!({}),
        });
        assert!(!should_merge(&b, Some(&a)));
        assert!(!should_merge(&a, Some(&b)));
    }

    #[test]
    fn test_should_merge_rejects_user_turns() {
        let a = text_event(EventKind::User, Role::User, "first");
        let b = text_event(EventKind::Assistant, Role::Assistant, "second");
        assert!(!should_merge(&b, Some(&a)));
    }
}
