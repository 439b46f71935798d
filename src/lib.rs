//! # Agent Core
//!
//! The event-sourced turn loop at the heart of an interactive coding
//! assistant: an append-only per-thread event log, a pure projection
//! from events to provider-format messages, a schema-validated tool
//! executor with a merged approval policy, a provider abstraction over
//! streaming/non-streaming OpenAI-compatible backends, and the `Agent`
//! turn controller that ties them together.
//!
//! ## Architecture
//!
//! - **log**: the append-only [`EventLog`] each thread is built from.
//! - **projection**: the pure function turning a thread's events into
//!   the message history a provider sees.
//! - **types**: `Event`/`EventKind`, `ProjectedMessage`, `ToolResult`,
//!   token-usage and turn-metrics shapes shared across the crate.
//! - **tools**/**executor**/**approval**/**hooks**: tool definition,
//!   schema-validated dispatch, the merged per-tool approval policy,
//!   and the `PreToolUse`/`PostToolUse`/`UserPromptSubmit` extension
//!   points.
//! - **provider**/**providers**: the abstract `Provider` contract and
//!   the concrete OpenAI-compatible adapter.
//! - **command**: the slash-command dispatcher.
//! - **queue**: the prioritized inbound message buffer drained between
//!   turns.
//! - **agent**: the `Agent` turn controller itself.
//! - **config**/**context**/**retry**/**error**/**events**: ambient
//!   configuration, context-window management, retry-with-backoff, the
//!   crate-wide error taxonomy, and the lifecycle-event/`Observable`
//!   fan-out the UI subscribes to.

mod approval;
mod cancellation;
mod command;
mod config;
mod context;
mod error;
mod events;
mod executor;
mod hooks;
mod log;
mod projection;
mod provider;
mod providers;
mod queue;
mod retry;
mod tools;
mod types;

pub mod agent;

pub use agent::Agent;

pub use approval::{merged_level_for, ApprovalCallback, FixedApproval, PolicyTable};

pub use cancellation::CancellationSignal;

pub use command::{Command, CommandDispatcher, CommandUi, Dispatch};

pub use config::{get_base_url, get_model, ConfigLayer, EffectiveConfiguration, Provider};

pub use context::{estimate_history_tokens, estimate_tokens, is_approaching_limit, truncate_messages};

pub use error::{Error, Result};

pub use events::{ErrorContext, LifecycleEvent, Observable};

pub use executor::Executor;

pub use hooks::{
    HookDecision, Hooks, PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent,
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_USER_PROMPT_SUBMIT,
};

pub use log::{EventLog, InMemoryEventLog};

pub use projection::project;

pub use provider::{Provider as LlmProvider, ProviderResponse, ProviderToolCall, StopReason, StreamSink, ToolSchema};

pub use providers::OpenAiCompatibleProvider;

pub use queue::{MessageQueue, QueueMessageType, QueueStats, QueuedMessage};

pub use retry::{compute_delay, retry_with_backoff, RetryConfig};

pub use tools::{tool, validate_args, FunctionTool, ParamType, Tool, ToolBuilder, ToolContext};

pub use types::{
    AgentOptions, AgentOptionsBuilder, AgentState, ApprovalLevel, CombinedTokenUsage,
    CurrentTurnMetrics, Decision, Event, EventKind, ProjectedMessage, ProjectedToolCall,
    ProviderUsage, Role, TextBlock, ThreadId, ThreadTokenUsage, ToolResult, ToolStatus,
};

/// Convenience re-export of the most commonly used items. Import with
/// `use agent_core::prelude::*;`.
pub mod prelude {
    pub use crate::{
        Agent, AgentOptions, AgentOptionsBuilder, Error, Event, EventKind, EventLog, Executor,
        HookDecision, Hooks, InMemoryEventLog, LlmProvider, OpenAiCompatibleProvider,
        ProjectedMessage, Result, Tool, ToolBuilder, ToolResult, tool,
    };
}
