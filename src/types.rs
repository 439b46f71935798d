//! Core data types shared by the event log, projection, executor, and agent.
//!
//! These are intentionally plain data: the log stores [`Event`]s, the
//! projection turns a slice of them into [`ProjectedMessage`]s, and the
//! turn controller threads [`ToolResult`]s and [`CurrentTurnMetrics`]
//! between the two.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Opaque thread identifier. Threads are created by an external Session
/// collaborator; the Agent only ever receives or generates one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        ThreadId(id.into())
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single block of plain text content. The only content-block kind the
/// core cares about; rendering richer content is out of scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        TextBlock { text: text.into() }
    }
}

/// Per-request usage as reported by a provider, if it reports one at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Thread-cumulative token accounting and context-window saturation,
/// carried on every `AGENT_MESSAGE` event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadTokenUsage {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub context_limit: u64,
    pub percent_used: f64,
    pub near_limit: bool,
}

impl ThreadTokenUsage {
    pub fn new(total_prompt_tokens: u64, total_completion_tokens: u64, context_limit: u64) -> Self {
        let total_tokens = total_prompt_tokens + total_completion_tokens;
        let percent_used = if context_limit == 0 {
            0.0
        } else {
            total_tokens as f64 / context_limit as f64
        };
        ThreadTokenUsage {
            total_prompt_tokens,
            total_completion_tokens,
            total_tokens,
            context_limit,
            percent_used,
            near_limit: percent_used >= 0.85,
        }
    }
}

/// Combines a single message's reported usage with the thread's running
/// total, as attached to `AGENT_MESSAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedTokenUsage {
    pub message: Option<ProviderUsage>,
    pub thread: ThreadTokenUsage,
}

/// The exhaustive set of event kinds that may appear in a thread's log.
/// Each variant carries its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// First system message (engine-authored).
    SystemPrompt(String),
    /// Second system message (user-authored); concatenated after
    /// `SystemPrompt` during projection.
    UserSystemPrompt(String),
    /// A user turn's raw text.
    UserMessage(String),
    /// Assistant content, thinking blocks kept verbatim, plus any usage
    /// reported for that response.
    AgentMessage {
        content: String,
        token_usage: Option<CombinedTokenUsage>,
    },
    /// An assistant tool invocation, paired by `id` with a later
    /// `ToolResult`.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The result for a matching `ToolCall` id.
    ToolResult {
        id: String,
        is_error: bool,
        content: Vec<TextBlock>,
        metadata: Option<serde_json::Value>,
    },
    /// UI-only annotation. Never forwarded to the provider.
    LocalSystemMessage(String),
}

impl EventKind {
    /// Short, stable label for logging; avoids dumping full payloads.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SystemPrompt(_) => "SYSTEM_PROMPT",
            EventKind::UserSystemPrompt(_) => "USER_SYSTEM_PROMPT",
            EventKind::UserMessage(_) => "USER_MESSAGE",
            EventKind::AgentMessage { .. } => "AGENT_MESSAGE",
            EventKind::ToolCall { .. } => "TOOL_CALL",
            EventKind::ToolResult { .. } => "TOOL_RESULT",
            EventKind::LocalSystemMessage(_) => "LOCAL_SYSTEM_MESSAGE",
        }
    }
}

/// The atomic, immutable unit of a thread's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: SystemTime,
    pub kind: EventKind,
}

/// Role of a projected message, mirroring the provider wire format's
/// four-role model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call as it appears attached to a projected assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry of the provider-format message history produced by
/// [`crate::projection::project`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedMessage {
    pub role: Role,
    pub content: String,
    /// Populated only on `role == Assistant` entries that made tool calls.
    pub tool_calls: Vec<ProjectedToolCall>,
    /// Populated only on `role == Tool` entries; the id of the `ToolCall`
    /// this result answers.
    pub tool_call_id: Option<String>,
}

impl ProjectedMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ProjectedMessage {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ProjectedMessage {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ProjectedToolCall>) -> Self {
        ProjectedMessage {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ProjectedMessage {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Execution status a tool reports on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    Completed,
    Aborted,
}

/// The outcome of executing a single tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub is_error: bool,
    pub content: Vec<TextBlock>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<ToolStatus>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        ToolResult {
            is_error: false,
            content: vec![TextBlock::new(text)],
            metadata: None,
            status: Some(ToolStatus::Completed),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        ToolResult {
            is_error: true,
            content: vec![TextBlock::new(text)],
            metadata: None,
            status: Some(ToolStatus::Completed),
        }
    }

    pub fn aborted() -> Self {
        ToolResult {
            is_error: true,
            content: vec![TextBlock::new("aborted")],
            metadata: None,
            status: Some(ToolStatus::Aborted),
        }
    }

    /// A denied tool call: `isError: true, status: "aborted"`.
    pub fn denied() -> Self {
        ToolResult {
            is_error: true,
            content: vec![TextBlock::new("approval denied")],
            metadata: None,
            status: Some(ToolStatus::Aborted),
        }
    }
}

/// The decision an approval callback returns for a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    AllowOnce,
    AllowSession,
    Deny,
}

/// A per-tool policy level, merged project → session → agent with the
/// most restrictive level winning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApprovalLevel {
    /// Least restrictive.
    Allow,
    RequireApproval,
    /// Most restrictive.
    Deny,
}

/// Per-turn, turn-local token/time accounting.
/// Not the same as [`ThreadTokenUsage`]: `tokens_in` here is an estimate
/// of what the user/tool results contributed *this turn*, not the
/// provider's full-context `promptTokens`.
///
/// `PartialEq` ignores `start_time`/`elapsed_ms` so tests can compare
/// metrics snapshots without pinning down wall-clock timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTurnMetrics {
    pub turn_id: String,
    pub start_time: SystemTime,
    pub elapsed_ms: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl CurrentTurnMetrics {
    pub fn new(turn_id: impl Into<String>, tokens_in: u64) -> Self {
        CurrentTurnMetrics {
            turn_id: turn_id.into(),
            start_time: SystemTime::now(),
            elapsed_ms: 0,
            tokens_in,
            tokens_out: 0,
        }
    }

    pub fn refresh_elapsed(&mut self) {
        self.elapsed_ms = self
            .start_time
            .elapsed()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
    }
}

impl PartialEq for CurrentTurnMetrics {
    fn eq(&self, other: &Self) -> bool {
        self.turn_id == other.turn_id
            && self.tokens_in == other.tokens_in
            && self.tokens_out == other.tokens_out
    }
}

/// Agent turn-loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Thinking,
    Streaming,
    ToolExecution,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Thinking => "thinking",
            AgentState::Streaming => "streaming",
            AgentState::ToolExecution => "tool_execution",
        };
        write!(f, "{s}")
    }
}

/// Configuration options for an Agent, built with the builder pattern.
/// `model` and `base_url` are required; everything else has a sensible
/// default.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub user_system_prompt: Option<String>,
    pub streaming_enabled: bool,
    pub context_limit: u64,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentOptionsBuilder {
    model: Option<String>,
    base_url: Option<String>,
    system_prompt: Option<String>,
    user_system_prompt: Option<String>,
    streaming_enabled: Option<bool>,
    context_limit: Option<u64>,
    display_name: Option<String>,
}

impl AgentOptions {
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }
}

impl AgentOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_system_prompt = Some(prompt.into());
        self
    }

    pub fn streaming_enabled(mut self, enabled: bool) -> Self {
        self.streaming_enabled = Some(enabled);
        self
    }

    pub fn context_limit(mut self, limit: u64) -> Self {
        self.context_limit = Some(limit);
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn build(self) -> crate::error::Result<AgentOptions> {
        let model = self
            .model
            .ok_or_else(|| crate::error::Error::config("model is required"))?;
        let base_url = self
            .base_url
            .ok_or_else(|| crate::error::Error::config("base_url is required"))?;
        Ok(AgentOptions {
            model,
            base_url,
            system_prompt: self.system_prompt,
            user_system_prompt: self.user_system_prompt,
            streaming_enabled: self.streaming_enabled.unwrap_or(true),
            context_limit: self.context_limit.unwrap_or(128_000),
            display_name: self.display_name,
        })
    }
}
