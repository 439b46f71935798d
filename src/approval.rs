//! Tool approval policy: the merge rule and the callback
//! contract tools are gated behind.

use crate::types::{ApprovalLevel, Decision};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// The external decision-maker consulted before executing a tool whose
/// policy demands it. Implementations must never block indefinitely and
/// should race their own wait against the executor's cancellation signal
/// (the Executor does this for you via `tokio::select!` — see
/// [`crate::executor::Executor`]).
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn request_approval(&self, tool_name: &str, args: &Value) -> Decision;
}

/// An `ApprovalCallback` that answers every request with a fixed
/// decision. Useful for tests and for fully-automated / auto-approve
/// CLI modes.
pub struct FixedApproval(pub Decision);

#[async_trait]
impl ApprovalCallback for FixedApproval {
    async fn request_approval(&self, _tool_name: &str, _args: &Value) -> Decision {
        self.0
    }
}

/// A per-tool-name policy map with a default level for unlisted tools.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    levels: HashMap<String, ApprovalLevel>,
    default: ApprovalLevel,
}

impl PolicyTable {
    pub fn new(default: ApprovalLevel) -> Self {
        PolicyTable {
            levels: HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, tool: impl Into<String>, level: ApprovalLevel) -> &mut Self {
        self.levels.insert(tool.into(), level);
        self
    }

    pub fn level_for(&self, tool: &str) -> ApprovalLevel {
        self.levels.get(tool).copied().unwrap_or(self.default)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        PolicyTable::new(ApprovalLevel::RequireApproval)
    }
}

/// Merge project → session → agent policy tables for one tool name,
/// the more restrictive level winning (agent-level `deny`
/// overrides a session-level `allow`).
pub fn merged_level_for(
    project: &PolicyTable,
    session: &PolicyTable,
    agent: &PolicyTable,
    tool: &str,
) -> ApprovalLevel {
    project
        .level_for(tool)
        .max(session.level_for(tool))
        .max(agent.level_for(tool))
}
