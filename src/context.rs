//! Context-window management: token estimation and history truncation.
//! Manual, no server round-trip required, ~70–85% accurate across model
//! families.

use crate::types::ProjectedMessage;

/// Approximate token count for a single string: ~1 token per 4 characters.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Approximate token count for an entire projected message history,
/// including a small per-message overhead for role/framing tokens.
pub fn estimate_history_tokens(messages: &[ProjectedMessage]) -> u64 {
    messages
        .iter()
        .map(|m| {
            let mut total = estimate_tokens(&m.content) + 4;
            for call in &m.tool_calls {
                total += estimate_tokens(&call.name);
                total += estimate_tokens(&call.arguments.to_string());
            }
            total
        })
        .sum()
}

/// True once the estimated token count of `messages` is at or beyond
/// `limit`. Used for proactive truncation before a request is even sent.
pub fn is_approaching_limit(messages: &[ProjectedMessage], limit: u64) -> bool {
    estimate_history_tokens(messages) >= limit
}

/// Keep only the most recent `keep_turns` user/assistant exchanges,
/// optionally always preserving a leading system message regardless of
/// the turn count.
pub fn truncate_messages(
    messages: &[ProjectedMessage],
    keep_turns: usize,
    preserve_system: bool,
) -> Vec<ProjectedMessage> {
    use crate::types::Role;

    let (system_prefix, rest): (Vec<_>, Vec<_>) = if preserve_system
        && messages.first().map(|m| m.role) == Some(Role::System)
    {
        (vec![messages[0].clone()], messages[1..].to_vec())
    } else {
        (vec![], messages.to_vec())
    };

    // A "turn" boundary is a user message; keep the last `keep_turns` of
    // them plus everything (assistant replies, tool calls/results) after
    // each kept boundary.
    let user_indices: Vec<usize> = rest
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();

    if user_indices.len() <= keep_turns {
        let mut out = system_prefix;
        out.extend(rest);
        return out;
    }

    let cutoff = user_indices[user_indices.len() - keep_turns];
    let mut out = system_prefix;
    out.extend(rest[cutoff..].iter().cloned());
    out
}
