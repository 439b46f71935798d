//! Deterministic log → provider-format message history.
//!
//! `project` is a pure function: same event slice in, same
//! [`ProjectedMessage`] sequence out (property P1). It runs in O(n) in
//! the event count and never fails — a malformed or partially-written
//! log degrades gracefully rather than erroring, because the Agent may
//! need to project a log that was truncated mid-write.

use crate::types::{Event, EventKind, ProjectedMessage, ProjectedToolCall};
use std::collections::HashSet;

/// Build the message history a provider should see from a thread's full
/// event slice. See the module docs above for the five projection rules
/// this implements.
pub fn project(events: &[Event]) -> Vec<ProjectedMessage> {
    let mut system_prompts: Vec<&str> = Vec::new();
    let mut user_system_prompts: Vec<&str> = Vec::new();
    let mut out: Vec<ProjectedMessage> = Vec::new();
    let mut seen_tool_call_ids: HashSet<&str> = HashSet::new();
    let mut last_assistant_idx: Option<usize> = None;

    for event in events {
        match &event.kind {
            EventKind::SystemPrompt(s) => system_prompts.push(s),
            EventKind::UserSystemPrompt(s) => user_system_prompts.push(s),

            EventKind::UserMessage(text) => {
                out.push(ProjectedMessage::user(text.clone()));
                last_assistant_idx = None;
            }

            EventKind::AgentMessage { content, .. } => {
                out.push(ProjectedMessage::assistant(content.clone(), Vec::new()));
                last_assistant_idx = Some(out.len() - 1);
            }

            EventKind::ToolCall { id, name, arguments } => {
                seen_tool_call_ids.insert(id.as_str());
                let call = ProjectedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                match last_assistant_idx {
                    Some(idx) => out[idx].tool_calls.push(call),
                    // A TOOL_CALL with no preceding AGENT_MESSAGE in this
                    // slice (e.g. projecting a log truncated right after
                    // the call) still needs *some* home so later pairing
                    // logic (P2) can find it; synthesize an empty
                    // assistant entry to carry it.
                    None => {
                        out.push(ProjectedMessage::assistant(String::new(), vec![call]));
                        last_assistant_idx = Some(out.len() - 1);
                    }
                }
            }

            EventKind::ToolResult {
                id,
                is_error,
                content,
                ..
            } => {
                if seen_tool_call_ids.contains(id.as_str()) {
                    let text = content
                        .iter()
                        .map(|block| block.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    let text = if *is_error {
                        format!("ERROR: {text}")
                    } else {
                        text
                    };
                    out.push(ProjectedMessage::tool(id.clone(), text));
                } else {
                    log::warn!("projection: dropping orphaned TOOL_RESULT for id {id}");
                }
            }

            EventKind::LocalSystemMessage(_) => {
                // Never forwarded to the provider.
            }
        }
    }

    if !system_prompts.is_empty() || !user_system_prompts.is_empty() {
        let mut combined = system_prompts.join("\n");
        if !user_system_prompts.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&user_system_prompts.join("\n"));
        }
        out.insert(0, ProjectedMessage::system(combined));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, ThreadId};
    use std::time::SystemTime;

    fn ev(seq: u64, kind: EventKind) -> Event {
        Event {
            seq,
            timestamp: SystemTime::now(),
            kind,
        }
    }

    #[test]
    fn p1_projection_is_pure_and_deterministic() {
        let events = vec![
            ev(0, EventKind::SystemPrompt("base".into())),
            ev(1, EventKind::UserMessage("hi".into())),
            ev(2, EventKind::AgentMessage { content: "hello".into(), token_usage: None }),
        ];
        assert_eq!(project(&events), project(&events));
    }

    #[test]
    fn system_prompts_concatenate_into_one_leading_entry() {
        let events = vec![
            ev(0, EventKind::SystemPrompt("engine prompt".into())),
            ev(1, EventKind::UserSystemPrompt("user prompt".into())),
            ev(2, EventKind::UserMessage("hi".into())),
        ];
        let projected = project(&events);
        assert_eq!(projected[0].role, Role::System);
        assert_eq!(projected[0].content, "engine prompt\nuser prompt");
        assert_eq!(projected[1].role, Role::User);
    }

    #[test]
    fn p3_local_system_message_never_appears() {
        let events = vec![
            ev(0, EventKind::UserMessage("hi".into())),
            ev(1, EventKind::LocalSystemMessage("ui note".into())),
        ];
        let projected = project(&events);
        assert_eq!(projected.len(), 1);
        assert!(projected.iter().all(|m| m.content != "ui note"));
    }

    #[test]
    fn p2_orphaned_tool_result_is_dropped() {
        // S3: USER_MESSAGE("hi"), TOOL_RESULT({id:"missing", ...})
        let events = vec![
            ev(0, EventKind::UserMessage("hi".into())),
            ev(
                1,
                EventKind::ToolResult {
                    id: "missing".into(),
                    is_error: false,
                    content: vec![],
                    metadata: None,
                },
            ),
        ];
        let projected = project(&events);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].role, Role::User);
        assert_eq!(projected[0].content, "hi");
    }

    #[test]
    fn tool_call_without_result_still_attaches_to_assistant_entry() {
        let events = vec![
            ev(0, EventKind::UserMessage("do x".into())),
            ev(
                1,
                EventKind::AgentMessage {
                    content: String::new(),
                    token_usage: None,
                },
            ),
            ev(
                2,
                EventKind::ToolCall {
                    id: "c1".into(),
                    name: "mock".into(),
                    arguments: serde_json::json!({}),
                },
            ),
        ];
        let projected = project(&events);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected[1].role, Role::Assistant);
        assert_eq!(projected[1].tool_calls.len(), 1);
        assert_eq!(projected[1].tool_calls[0].id, "c1");
        // No standalone tool-role entry was created for it.
        assert!(projected.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn paired_tool_call_and_result_project_to_assistant_and_tool_entries() {
        let events = vec![
            ev(0, EventKind::UserMessage("do x".into())),
            ev(
                1,
                EventKind::AgentMessage {
                    content: String::new(),
                    token_usage: None,
                },
            ),
            ev(
                2,
                EventKind::ToolCall {
                    id: "c1".into(),
                    name: "mock".into(),
                    arguments: serde_json::json!({"action": "x"}),
                },
            ),
            ev(
                3,
                EventKind::ToolResult {
                    id: "c1".into(),
                    is_error: false,
                    content: vec![crate::types::TextBlock::new("ok")],
                    metadata: None,
                },
            ),
        ];
        let projected = project(&events);
        assert_eq!(projected.len(), 3);
        assert_eq!(projected[1].tool_calls[0].id, "c1");
        assert_eq!(projected[2].role, Role::Tool);
        assert_eq!(projected[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(projected[2].content, "ok");
    }

    #[test]
    fn empty_log_projects_to_empty_history() {
        let events: Vec<Event> = vec![];
        assert_eq!(project(&events), vec![]);
    }

    #[test]
    fn thread_id_display_matches_inner_string() {
        let id = ThreadId::new("abc");
        assert_eq!(id.to_string(), "abc");
    }
}
