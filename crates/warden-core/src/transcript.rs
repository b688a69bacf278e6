//! Audit rendering of a reasoning exchange.
//!
//! Messages are flattened into numbered steps. System prompts are omitted,
//! free text is clipped, and log event arrays are summarized by count.

use crate::text::clip_chars;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use warden_proto::{DirectiveKind, Message};

const INCIDENT_DETAIL_CHARS: usize = 500;
const REASONING_DETAIL_CHARS: usize = 500;
const SYSTEM_DETAIL_CHARS: usize = 300;
const RAW_SUMMARY_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptStep {
    pub step: usize,
    #[serde(flatten)]
    pub entry: StepEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepEntry {
    IncidentReceived { detail: String },
    Nudge { detail: String },
    SystemMessage { detail: String },
    Reasoning { detail: String },
    ToolCall { tool: String, args: Value },
    Submit { tool: String, outcome: Value },
    ToolResult { summary: Value },
    ToolError { error: Value },
}

fn summarize_tool_output(content: &str) -> StepEntry {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut data)) => {
            if let Some(error) = data.remove("error") {
                return StepEntry::ToolError { error };
            }
            if let Some(events) = data.remove("events") {
                let count = events.as_array().map_or(0, Vec::len);
                data.insert("event_count".to_string(), json!(count));
            }
            StepEntry::ToolResult {
                summary: Value::Object(data),
            }
        }
        _ => StepEntry::ToolResult {
            summary: Value::String(clip_chars(content, RAW_SUMMARY_CHARS).to_string()),
        },
    }
}

/// Renders messages as audit steps.
pub fn serialize_messages(messages: &[Message], submit_tool: &str) -> Vec<TranscriptStep> {
    let mut entries = Vec::new();

    for message in messages {
        match message {
            Message::System { .. } => {}
            Message::User { content } => {
                let entry = if entries.is_empty() {
                    StepEntry::IncidentReceived {
                        detail: clip_chars(content, INCIDENT_DETAIL_CHARS).to_string(),
                    }
                } else {
                    StepEntry::SystemMessage {
                        detail: clip_chars(content, SYSTEM_DETAIL_CHARS).to_string(),
                    }
                };
                entries.push(entry);
            }
            Message::Directive { kind, content } => entries.push(match kind {
                DirectiveKind::Nudge => StepEntry::Nudge {
                    detail: content.clone(),
                },
                DirectiveKind::Deadline | DirectiveKind::Budget => StepEntry::SystemMessage {
                    detail: clip_chars(content, SYSTEM_DETAIL_CHARS).to_string(),
                },
            }),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                if !content.trim().is_empty() {
                    entries.push(StepEntry::Reasoning {
                        detail: clip_chars(content, REASONING_DETAIL_CHARS).to_string(),
                    });
                }
                for call in tool_calls {
                    entries.push(if call.name == submit_tool {
                        StepEntry::Submit {
                            tool: call.name.clone(),
                            outcome: call.arguments.clone(),
                        }
                    } else {
                        StepEntry::ToolCall {
                            tool: call.name.clone(),
                            args: call.arguments.clone(),
                        }
                    });
                }
            }
            Message::Tool { content, .. } => entries.push(summarize_tool_output(content)),
        }
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| TranscriptStep { step: i + 1, entry })
        .collect()
}

/// Drops middle steps when the rendered transcript exceeds `max_bytes`.
///
/// Keeps the first `keep_head` and last `keep_tail` steps. Returns whether
/// anything was dropped.
pub fn truncate_for_storage(
    steps: Vec<TranscriptStep>,
    max_bytes: usize,
    keep_head: usize,
    keep_tail: usize,
) -> (Vec<TranscriptStep>, bool) {
    let size = serde_json::to_vec(&steps).map_or(0, |bytes| bytes.len());
    if size <= max_bytes || steps.len() <= keep_head + keep_tail {
        return (steps, false);
    }
    let tail_start = steps.len() - keep_tail;
    let kept = steps
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i < keep_head || *i >= tail_start)
        .map(|(_, step)| step)
        .collect();
    (kept, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_proto::ToolCall;

    fn assistant(content: &str, calls: Vec<ToolCall>) -> Message {
        Message::Assistant {
            content: content.to_string(),
            tool_calls: calls,
        }
    }

    fn tool(content: &str) -> Message {
        Message::Tool {
            call_id: "c1".into(),
            name: "get_recent_logs".into(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_step_actions() {
        let messages = vec![
            Message::system("you are a diagnostician"),
            Message::user("Investigate this incident"),
            assistant("", vec![ToolCall::new("c1", "get_recent_logs", json!({"lambda_name": "fn"}))]),
            tool(r#"{"log_group": "/aws/lambda/fn", "events": [{"timestamp": "1", "message": "denied"}]}"#),
            assistant("The role lost its policy.", vec![]),
            Message::directive(DirectiveKind::Nudge, "call submit_diagnosis now"),
            assistant("", vec![ToolCall::new("c2", "submit_diagnosis", json!({"root_cause": "x"}))]),
        ];

        let steps = serialize_messages(&messages, "submit_diagnosis");
        let actions: Vec<_> = steps
            .iter()
            .map(|s| serde_json::to_value(s).unwrap()["action"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            actions,
            vec!["incident_received", "tool_call", "tool_result", "reasoning", "nudge", "submit"]
        );
        assert_eq!(steps[0].step, 1);
        assert_eq!(steps[5].step, 6);

        let StepEntry::ToolResult { summary } = &steps[2].entry else {
            panic!("expected tool_result");
        };
        assert_eq!(summary["event_count"], 1);
        assert!(summary.get("events").is_none());
    }

    #[test]
    fn test_tool_error_and_raw_output() {
        let steps = serialize_messages(
            &[
                Message::user("go"),
                tool(r#"{"error": "unknown tool"}"#),
                tool("not json at all"),
            ],
            "submit_diagnosis",
        );
        assert_eq!(
            steps[1].entry,
            StepEntry::ToolError {
                error: json!("unknown tool")
            }
        );
        assert_eq!(
            steps[2].entry,
            StepEntry::ToolResult {
                summary: json!("not json at all")
            }
        );
    }

    #[test]
    fn test_details_are_clipped() {
        let long = "a".repeat(2_000);
        let steps = serialize_messages(
            &[Message::user(long.clone()), Message::user(long)],
            "submit_diagnosis",
        );
        let StepEntry::IncidentReceived { detail } = &steps[0].entry else {
            panic!("expected incident_received");
        };
        assert_eq!(detail.len(), 500);
        let StepEntry::SystemMessage { detail } = &steps[1].entry else {
            panic!("expected system_message");
        };
        assert_eq!(detail.len(), 300);
    }

    #[test]
    fn test_storage_truncation_keeps_head_and_tail() {
        let steps: Vec<_> = (0..5)
            .map(|i| TranscriptStep {
                step: i + 1,
                entry: StepEntry::Reasoning {
                    detail: "x".repeat(100_000),
                },
            })
            .collect();

        let (kept, truncated) = truncate_for_storage(steps, 350_000, 1, 3);
        assert!(truncated);
        let numbers: Vec<_> = kept.iter().map(|s| s.step).collect();
        assert_eq!(numbers, vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_storage_truncation_noop_when_small() {
        let steps = serialize_messages(&[Message::user("hi")], "submit_diagnosis");
        let (kept, truncated) = truncate_for_storage(steps.clone(), 350_000, 1, 3);
        assert!(!truncated);
        assert_eq!(kept, steps);
    }
}
