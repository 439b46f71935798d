//! Lifecycle hooks: an extension point alongside (not instead of) the
//! approval callback. `PreToolUse` can block or rewrite a tool call
//! before schema validation even runs; `PostToolUse` observes the final
//! result; `UserPromptSubmit` can rewrite the user's text before it
//! becomes a `USER_MESSAGE`. Also the mechanism an embedder reaches for
//! to have non-`compact` commands append `LOCAL_SYSTEM_MESSAGE`
//! annotations of their own.

use crate::types::ProjectedMessage;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const HOOK_PRE_TOOL_USE: &str = "PreToolUse";
pub const HOOK_POST_TOOL_USE: &str = "PostToolUse";
pub const HOOK_USER_PROMPT_SUBMIT: &str = "UserPromptSubmit";

/// What a hook wants the engine to do next. The first non-`Continue`
/// decision returned by any registered hook of a given type wins;
/// later hooks of that type are not consulted.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    /// Proceed as if no hook had run.
    Continue,
    /// Refuse the operation with a human-readable reason. For
    /// `PreToolUse` this short-circuits straight to an `isError`
    /// `ToolResult` without calling `execute_validated`.
    Block(String),
    /// Replace the tool's input arguments (`PreToolUse` only).
    ModifyInput(Value),
    /// Replace the user's submitted text (`UserPromptSubmit` only).
    ModifyPrompt(String),
}

/// Event data passed to `PreToolUse` hooks.
#[derive(Debug, Clone)]
pub struct PreToolUseEvent {
    pub tool_name: String,
    pub arguments: Value,
    pub call_id: String,
    pub history: Vec<ProjectedMessage>,
}

/// Event data passed to `PostToolUse` hooks.
#[derive(Debug, Clone)]
pub struct PostToolUseEvent {
    pub tool_name: String,
    pub arguments: Value,
    pub call_id: String,
    pub result: crate::types::ToolResult,
    pub history: Vec<ProjectedMessage>,
}

/// Event data passed to `UserPromptSubmit` hooks.
#[derive(Debug, Clone)]
pub struct UserPromptSubmitEvent {
    pub prompt: String,
    pub history: Vec<ProjectedMessage>,
}

type HookResultFuture = Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>;
type PreToolUseFn = dyn Fn(PreToolUseEvent) -> HookResultFuture + Send + Sync;
type PostToolUseFn = dyn Fn(PostToolUseEvent) -> HookResultFuture + Send + Sync;
type UserPromptSubmitFn = dyn Fn(UserPromptSubmitEvent) -> HookResultFuture + Send + Sync;

/// Container for registering and running lifecycle hooks. Hooks run
/// sequentially in registration order; the first non-`Continue`
/// decision takes effect and stops the chain for that event.
#[derive(Default, Clone)]
pub struct Hooks {
    pre_tool_use: Vec<Arc<PreToolUseFn>>,
    post_tool_use: Vec<Arc<PostToolUseFn>>,
    user_prompt_submit: Vec<Arc<UserPromptSubmitFn>>,
}

impl Hooks {
    pub fn new() -> Self {
        Hooks::default()
    }

    pub fn on_pre_tool_use<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PreToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.pre_tool_use
            .push(Arc::new(move |event| Box::pin(hook(event))));
        self
    }

    pub fn on_post_tool_use<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PostToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.post_tool_use
            .push(Arc::new(move |event| Box::pin(hook(event))));
        self
    }

    pub fn on_user_prompt_submit<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(UserPromptSubmitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.user_prompt_submit
            .push(Arc::new(move |event| Box::pin(hook(event))));
        self
    }

    pub async fn run_pre_tool_use(&self, event: PreToolUseEvent) -> HookDecision {
        for hook in &self.pre_tool_use {
            if let Some(decision) = hook(event.clone()).await {
                if decision != HookDecision::Continue {
                    return decision;
                }
            }
        }
        HookDecision::Continue
    }

    pub async fn run_post_tool_use(&self, event: PostToolUseEvent) -> HookDecision {
        for hook in &self.post_tool_use {
            if let Some(decision) = hook(event.clone()).await {
                if decision != HookDecision::Continue {
                    return decision;
                }
            }
        }
        HookDecision::Continue
    }

    pub async fn run_user_prompt_submit(&self, event: UserPromptSubmitEvent) -> HookDecision {
        for hook in &self.user_prompt_submit {
            if let Some(decision) = hook(event.clone()).await {
                if decision != HookDecision::Continue {
                    return decision;
                }
            }
        }
        HookDecision::Continue
    }
}
