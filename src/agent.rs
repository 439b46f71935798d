//! The Turn Controller: the Agent state machine that ties
//! the event log, projection, provider, and executor together into one
//! cooperative turn loop.

use crate::cancellation::CancellationSignal;
use crate::command::{CommandDispatcher, CommandUi, Dispatch};
use crate::config::{ConfigLayer, EffectiveConfiguration};
use crate::context::estimate_tokens;
use crate::error::{Error, Result};
use crate::events::{ErrorContext, LifecycleEvent, Observable};
use crate::executor::Executor;
use crate::hooks::{HookDecision, Hooks, UserPromptSubmitEvent};
use crate::log::EventLog;
use crate::projection::project;
use crate::provider::{Provider, ProviderResponse, StreamSink, ToolSchema};
use crate::queue::{MessageQueue, QueueMessageType, QueueStats, QueuedMessage};
use crate::tools::ToolContext;
use crate::types::{
    AgentOptions, AgentState, CombinedTokenUsage, CurrentTurnMetrics, EventKind, ProjectedMessage,
    ProviderUsage, ThreadId, ThreadTokenUsage,
};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as TokioMutex;

/// A [`CommandUi`] that swallows every call. The default for an Agent
/// built without an explicit UI handle; real display/status/exit
/// behavior is the embedder's responsibility to wire in.
struct NoopCommandUi;

impl CommandUi for NoopCommandUi {
    fn display(&self, _text: &str) {}
}

/// Three layers of configuration override an embedder may apply over
/// an Agent's built-in defaults. Opaque to the turn loop itself — only
/// the merge order matters.
#[derive(Default)]
struct ConfigOverrides {
    project: RwLock<ConfigLayer>,
    session: RwLock<ConfigLayer>,
    agent: RwLock<ConfigLayer>,
}

/// The Agent: owns one thread at a time, drives the provider/executor
/// turn loop, and fans out lifecycle events to subscribers.
pub struct Agent {
    event_log: Arc<dyn EventLog>,
    provider: Arc<dyn Provider>,
    executor: Executor,
    observable: Arc<Observable>,
    queue: MessageQueue,
    dispatcher: CommandDispatcher,
    ui: Arc<dyn CommandUi>,
    hooks: Hooks,
    options: AgentOptions,
    overrides: ConfigOverrides,
    working_dir: PathBuf,

    thread_id: RwLock<ThreadId>,
    state: RwLock<AgentState>,
    seeded: AtomicBool,
    cancellation: RwLock<CancellationSignal>,
    turn_lock: TokioMutex<()>,
    /// Cumulative (prompt, completion) tokens reported by the provider
    /// across every AGENT_MESSAGE on the current thread. Reset whenever
    /// the thread changes (e.g. after `compact`).
    thread_usage: RwLock<(u64, u64)>,
}

impl Agent {
    pub fn new(
        event_log: Arc<dyn EventLog>,
        thread_id: ThreadId,
        provider: Arc<dyn Provider>,
        executor: Executor,
        options: AgentOptions,
    ) -> Self {
        Agent {
            event_log,
            provider,
            executor,
            observable: Arc::new(Observable::new()),
            queue: MessageQueue::new(),
            dispatcher: CommandDispatcher::new(),
            ui: Arc::new(NoopCommandUi),
            hooks: Hooks::new(),
            options,
            overrides: ConfigOverrides::default(),
            working_dir: std::env::current_dir().unwrap_or_default(),
            thread_id: RwLock::new(thread_id),
            state: RwLock::new(AgentState::Idle),
            seeded: AtomicBool::new(false),
            cancellation: RwLock::new(CancellationSignal::new()),
            turn_lock: TokioMutex::new(()),
            thread_usage: RwLock::new((0, 0)),
        }
    }

    pub fn with_ui(mut self, ui: Arc<dyn CommandUi>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Use an externally-created `Observable` instead of the Agent's own.
    /// Lets an embedder hand the same handle to a [`crate::Provider`]
    /// adapter (e.g. [`crate::OpenAiCompatibleProvider::with_events`]) so
    /// provider-level events like `retry_attempt` land on the same
    /// subscriber list as the turn loop's own lifecycle events.
    pub fn with_observable(mut self, observable: Arc<Observable>) -> Self {
        self.observable = observable;
        self
    }

    pub fn set_session_overrides(&self, layer: ConfigLayer) {
        *self.overrides.session.write().unwrap() = layer;
    }

    pub fn set_project_overrides(&self, layer: ConfigLayer) {
        *self.overrides.project.write().unwrap() = layer;
    }

    pub fn set_agent_overrides(&self, layer: ConfigLayer) {
        *self.overrides.agent.write().unwrap() = layer;
    }

    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.observable.subscribe(subscriber);
    }

    pub fn get_current_state(&self) -> AgentState {
        *self.state.read().unwrap()
    }

    pub fn get_thread_id(&self) -> ThreadId {
        self.thread_id.read().unwrap().clone()
    }

    pub fn get_available_tools(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    pub fn get_effective_configuration(&self) -> EffectiveConfiguration {
        let defaults = EffectiveConfiguration {
            model: self.options.model.clone(),
            base_url: self.options.base_url.clone(),
            streaming_enabled: self.options.streaming_enabled,
            context_limit: self.options.context_limit,
        };
        EffectiveConfiguration::merge(
            &defaults,
            &self.overrides.project.read().unwrap(),
            &self.overrides.session.read().unwrap(),
            &self.overrides.agent.read().unwrap(),
        )
    }

    /// Current thread's message history via the projection.
    pub async fn build_thread_messages(&self) -> Result<Vec<ProjectedMessage>> {
        let thread_id = self.get_thread_id();
        let events = self.event_log.events(&thread_id).await?;
        Ok(project(&events))
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.get_queue_stats().await
    }

    pub async fn queue_message(
        &self,
        text: impl Into<String>,
        message_type: QueueMessageType,
        metadata: Option<serde_json::Value>,
    ) -> String {
        self.queue.queue_message(text, message_type, metadata).await
    }

    pub async fn clear_queue(
        &self,
        filter: Option<&dyn Fn(&QueuedMessage) -> bool>,
    ) -> usize {
        self.queue.clear_queue(filter).await
    }

    /// Idempotent: seeds system prompts at most once, even
    /// under concurrent callers, via a compare-and-swap on `seeded`.
    pub async fn start(&self) -> Result<()> {
        if self.seeded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let thread_id = self.get_thread_id();
        self.event_log.create_thread(thread_id.clone()).await?;
        let events = self.event_log.events(&thread_id).await.unwrap_or_default();
        let already_has_content = events.iter().any(|e| {
            matches!(
                e.kind,
                EventKind::SystemPrompt(_)
                    | EventKind::UserSystemPrompt(_)
                    | EventKind::UserMessage(_)
                    | EventKind::AgentMessage { .. }
            )
        });
        if already_has_content {
            return Ok(());
        }

        if let Some(prompt) = self.options.system_prompt.clone() {
            self.append(EventKind::SystemPrompt(prompt)).await?;
        }
        if let Some(prompt) = self.options.user_system_prompt.clone() {
            self.append(EventKind::UserSystemPrompt(prompt)).await?;
        }
        Ok(())
    }

    /// Auto-starts; dispatches `/`-prefixed input to the command layer;
    /// otherwise appends USER_MESSAGE and runs a turn.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.start().await?;
        let text = text.into();

        match self.dispatcher.dispatch(&text, self.ui.as_ref()).await {
            Dispatch::NotACommand => {}
            Dispatch::Compact => return self.compact().await,
            Dispatch::Unknown(name) => {
                self.ui.display(&format!("Unknown command: {name}"));
                return Ok(());
            }
            Dispatch::Handled => return Ok(()),
        }

        if text.trim().is_empty() {
            return Ok(());
        }

        let history = self.build_thread_messages().await.unwrap_or_default();
        let text = match self
            .hooks
            .run_user_prompt_submit(UserPromptSubmitEvent {
                prompt: text.clone(),
                history,
            })
            .await
        {
            HookDecision::Block(reason) => {
                self.ui.display(&format!("prompt blocked: {reason}"));
                return Ok(());
            }
            HookDecision::ModifyPrompt(rewritten) => rewritten,
            _ => text,
        };

        self.append(EventKind::UserMessage(text.clone())).await?;
        self.run_turn(text).await
    }

    /// Runs a turn without appending a new USER_MESSAGE, for resumption
    /// after a process restart or an externally-injected event.
    pub async fn continue_conversation(&self) -> Result<()> {
        self.start().await?;
        self.run_turn(String::new()).await
    }

    /// Cooperatively cancels the in-flight turn. Returns `true` iff a
    /// turn was actually running.
    pub fn abort(&self) -> bool {
        let in_flight = *self.state.read().unwrap() != AgentState::Idle;
        self.cancellation.read().unwrap().trip();
        in_flight
    }

    /// Summarizes the current thread via one provider call, creates a
    /// fresh thread with the summary as its only content, and switches
    /// the Agent onto it.
    pub async fn compact(&self) -> Result<()> {
        let outcome = {
            let _guard = self.turn_lock.lock().await;
            self.compact_inner().await
        };
        self.drain_queue().await;
        outcome
    }

    async fn compact_inner(&self) -> Result<()> {
        let old_thread = self.get_thread_id();
        let turn_id = format!("compact-{:016x}", rand::random::<u64>());
        let mut metrics = CurrentTurnMetrics::new(turn_id.clone(), 0);

        self.set_state(AgentState::Thinking);
        self.observable.emit(LifecycleEvent::AgentThinkingStart);
        let summary = self.summarize_thread(&old_thread).await;
        self.observable.emit(LifecycleEvent::AgentThinkingComplete);
        metrics.refresh_elapsed();

        match summary {
            Ok(summary) => {
                let new_thread = self.event_log.generate_thread_id().await;
                self.event_log.create_thread(new_thread.clone()).await?;
                let event = self
                    .event_log
                    .append(
                        &new_thread,
                        EventKind::AgentMessage {
                            content: summary,
                            token_usage: None,
                        },
                    )
                    .await?;
                self.observable
                    .emit(LifecycleEvent::ThreadEventAdded { event });
                *self.thread_id.write().unwrap() = new_thread;
                *self.thread_usage.write().unwrap() = (0, 0);
                self.set_state(AgentState::Idle);
                self.observable.emit(LifecycleEvent::TurnComplete {
                    turn_id,
                    metrics,
                });
                Ok(())
            }
            Err(err) => {
                self.observable.emit(LifecycleEvent::Error {
                    error: err.to_string(),
                    context: ErrorContext::operation("compact", old_thread),
                });
                self.set_state(AgentState::Idle);
                self.observable.emit(LifecycleEvent::TurnComplete {
                    turn_id,
                    metrics,
                });
                Err(err)
            }
        }
    }

    async fn summarize_thread(&self, thread_id: &ThreadId) -> Result<String> {
        let events = self.event_log.events(thread_id).await?;
        let mut messages = project(&events);
        messages.push(ProjectedMessage::user(
            "Summarize this conversation so far in a few sentences for future context.",
        ));
        let effective = self.get_effective_configuration();
        let response = self
            .provider
            .create_response(&messages, &[], &effective.model, &CancellationSignal::new())
            .await?;
        Ok(response.content)
    }

    fn set_state(&self, to: AgentState) {
        let from = {
            let mut guard = self.state.write().unwrap();
            let from = *guard;
            *guard = to;
            from
        };
        if from != to {
            self.observable.emit(LifecycleEvent::StateChange { from, to });
        }
    }

    async fn append(&self, kind: EventKind) -> Result<crate::types::Event> {
        let thread_id = self.get_thread_id();
        let event = self.event_log.append(&thread_id, kind).await?;
        self.observable
            .emit(LifecycleEvent::ThreadEventAdded { event: event.clone() });
        Ok(event)
    }

    fn record_usage(&self, usage: Option<ProviderUsage>) -> Option<CombinedTokenUsage> {
        let usage = usage?;
        let mut totals = self.thread_usage.write().unwrap();
        totals.0 += usage.prompt_tokens;
        totals.1 += usage.completion_tokens;
        let thread = ThreadTokenUsage::new(totals.0, totals.1, self.options.context_limit);
        Some(CombinedTokenUsage {
            message: Some(usage),
            thread,
        })
    }

    /// Acquires the single-flight turn lock, runs the loop, then drains
    /// any messages queued while the turn (and any queued messages it
    /// spawned) were running.
    async fn run_turn(&self, user_input: String) -> Result<()> {
        let outcome = {
            let _guard = self.turn_lock.lock().await;
            self.run_turn_inner(user_input).await
        };
        self.drain_queue().await;
        outcome
    }

    /// The turn algorithm's send→think→(tool-call loop)→respond steps,
    /// implemented as a loop rather than literal recursion: each iteration is one
    /// provider call plus any tool calls it requested.
    async fn run_turn_inner(&self, user_input: String) -> Result<()> {
        let turn_id = format!("turn-{:016x}", rand::random::<u64>());
        let cancellation = CancellationSignal::new();
        *self.cancellation.write().unwrap() = cancellation.clone();

        let tokens_in = estimate_tokens(&user_input);
        let mut metrics = CurrentTurnMetrics::new(turn_id.clone(), tokens_in);
        self.observable.emit(LifecycleEvent::TurnStart {
            turn_id: turn_id.clone(),
            user_input,
            metrics: metrics.clone(),
        });

        self.set_state(AgentState::Thinking);
        self.observable.emit(LifecycleEvent::AgentThinkingStart);

        loop {
            let thread_id = self.get_thread_id();
            let events = match self.event_log.events(&thread_id).await {
                Ok(events) => events,
                Err(err) => return self.fail_turn(turn_id, metrics, err).await,
            };
            let messages = project(&events);
            let tools = self.executor.tool_schemas();
            let effective = self.get_effective_configuration();

            let first_token_emitted = Arc::new(AtomicBool::new(false));
            let response = if self.provider.supports_streaming() && effective.streaming_enabled {
                self.set_state(AgentState::Streaming);
                let outcome = {
                    let mut sink = AgentStreamSink {
                        agent: self,
                        metrics: &mut metrics,
                        first_token_emitted: first_token_emitted.clone(),
                    };
                    self.provider
                        .create_streaming_response(
                            &messages,
                            &tools,
                            &effective.model,
                            &cancellation,
                            &mut sink,
                        )
                        .await
                };
                self.set_state(AgentState::Thinking);
                outcome
            } else {
                self.provider
                    .create_response(&messages, &tools, &effective.model, &cancellation)
                    .await
            };

            let response = match response {
                Ok(response) => response,
                Err(Error::Aborted) if first_token_emitted.load(Ordering::SeqCst) => {
                    return self.abort_turn(turn_id, metrics).await;
                }
                Err(err) => return self.fail_turn(turn_id, metrics, err).await,
            };

            self.observable.emit(LifecycleEvent::AgentThinkingComplete);

            if response.usage.is_none() && metrics.tokens_out == 0 {
                metrics.tokens_out = estimate_tokens(&response.content);
            } else if let Some(usage) = &response.usage {
                metrics.tokens_out = usage.completion_tokens;
            }

            let combined_usage = self.record_usage(response.usage.clone());
            if let Err(err) = self
                .append(EventKind::AgentMessage {
                    content: response.content.clone(),
                    token_usage: combined_usage,
                })
                .await
            {
                return self.fail_turn(turn_id, metrics, err).await;
            }

            self.observable.emit(LifecycleEvent::AgentResponseComplete {
                content: strip_think_blocks(&response.content),
            });

            if response.tool_calls.is_empty() {
                self.set_state(AgentState::Idle);
                metrics.refresh_elapsed();
                self.observable.emit(LifecycleEvent::TurnComplete {
                    turn_id,
                    metrics,
                });
                self.observable.emit(LifecycleEvent::ConversationComplete);
                return Ok(());
            }

            self.set_state(AgentState::ToolExecution);
            for call in &response.tool_calls {
                if cancellation.is_cancelled() {
                    return self.abort_turn(turn_id, metrics).await;
                }

                if let Err(err) = self
                    .append(EventKind::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await
                {
                    return self.fail_turn(turn_id, metrics, err).await;
                }
                self.observable.emit(LifecycleEvent::ToolCallStart {
                    tool_name: call.name.clone(),
                    input: call.arguments.clone(),
                    call_id: call.id.clone(),
                });

                let history = match self.event_log.events(&thread_id).await {
                    Ok(events) => project(&events),
                    Err(err) => return self.fail_turn(turn_id, metrics, err).await,
                };
                let tool_context = ToolContext {
                    thread_id: thread_id.clone(),
                    cancellation: cancellation.clone(),
                    working_dir: self.working_dir.clone(),
                };
                let result = self
                    .executor
                    .execute(&call.id, &call.name, call.arguments.clone(), &tool_context, history)
                    .await;

                if let Err(err) = self
                    .append(EventKind::ToolResult {
                        id: call.id.clone(),
                        is_error: result.is_error,
                        content: result.content.clone(),
                        metadata: result.metadata.clone(),
                    })
                    .await
                {
                    return self.fail_turn(turn_id, metrics, err).await;
                }
                for block in &result.content {
                    metrics.tokens_in += estimate_tokens(&block.text);
                }
                self.observable.emit(LifecycleEvent::ToolCallComplete {
                    tool_name: call.name.clone(),
                    result,
                    call_id: call.id.clone(),
                });
            }

            self.set_state(AgentState::Thinking);
            // loop back to step 3: re-project (now including the tool
            // results just appended) and call the provider again.
        }
    }

    async fn fail_turn(
        &self,
        turn_id: String,
        mut metrics: CurrentTurnMetrics,
        err: Error,
    ) -> Result<()> {
        self.observable.emit(LifecycleEvent::Error {
            error: err.to_string(),
            context: ErrorContext::phase("provider_response"),
        });
        self.set_state(AgentState::Idle);
        metrics.refresh_elapsed();
        self.observable.emit(LifecycleEvent::TurnComplete {
            turn_id,
            metrics,
        });
        Err(err)
    }

    async fn abort_turn(&self, turn_id: String, mut metrics: CurrentTurnMetrics) -> Result<()> {
        self.set_state(AgentState::Idle);
        metrics.refresh_elapsed();
        self.observable
            .emit(LifecycleEvent::TurnAborted { turn_id, metrics });
        Ok(())
    }

    /// Drains queued messages high-priority-first, FIFO within each
    /// class; each drained message becomes its own USER_MESSAGE plus
    /// turn. Loops until the queue is empty, including
    /// arrivals made while a drained message's turn was running.
    async fn drain_queue(&self) {
        loop {
            let drained = self.queue.drain_ordered().await;
            if drained.is_empty() {
                break;
            }
            for message in drained {
                if let Err(err) = self.append(EventKind::UserMessage(message.text.clone())).await {
                    log::warn!("failed to append queued message: {err}");
                    continue;
                }
                let turn: Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> =
                    Box::pin(self.run_turn(message.text));
                if let Err(err) = turn.await {
                    log::warn!("queued-message turn failed: {err}");
                }
            }
        }
    }
}

struct AgentStreamSink<'a> {
    agent: &'a Agent,
    metrics: &'a mut CurrentTurnMetrics,
    first_token_emitted: Arc<AtomicBool>,
}

impl<'a> StreamSink for AgentStreamSink<'a> {
    fn on_token(&mut self, token: &str) {
        self.first_token_emitted.store(true, Ordering::SeqCst);
        self.metrics.tokens_out += estimate_tokens(token);
        self.agent
            .observable
            .emit(LifecycleEvent::AgentToken {
                token: token.to_string(),
            });
    }

    fn on_usage_update(&mut self, usage: ProviderUsage) {
        self.metrics.tokens_out = usage.completion_tokens;
        self.metrics.refresh_elapsed();
        self.agent
            .observable
            .emit(LifecycleEvent::TurnProgress {
                metrics: self.metrics.clone(),
            });
    }
}

/// Strips `<think>...</think>` blocks for the UI-facing
/// `agent_response_complete` payload; the stored AGENT_MESSAGE keeps
/// them verbatim. No regex crate in the dependency table, so this is a
/// small hand-rolled scan.
fn strip_think_blocks(content: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        rest = &rest[start + OPEN.len()..];
        match rest.find(CLOSE) {
            Some(end) => rest = &rest[end + CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::FixedApproval;
    use crate::log::InMemoryEventLog;
    use crate::provider::{ProviderToolCall, StopReason};
    use crate::tools::{tool, ParamType};
    use crate::types::{ApprovalLevel, Decision, ToolResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedProvider {
        responses: AsyncMutex<VecDeque<ProviderResponse>>,
        supports_streaming: bool,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ProviderResponse>) -> Self {
            ScriptedProvider {
                responses: AsyncMutex::new(responses.into_iter().collect()),
                supports_streaming: false,
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn supports_streaming(&self) -> bool {
            self.supports_streaming
        }

        async fn create_response(
            &self,
            _messages: &[ProjectedMessage],
            _tools: &[ToolSchema],
            _model: &str,
            _cancellation: &CancellationSignal,
        ) -> Result<ProviderResponse> {
            self.responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| Error::provider("scripted provider exhausted"))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn provider_name(&self) -> &str {
            "slow"
        }

        async fn create_response(
            &self,
            _messages: &[ProjectedMessage],
            _tools: &[ToolSchema],
            _model: &str,
            cancellation: &CancellationSignal,
        ) -> Result<ProviderResponse> {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(Error::Aborted),
                _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(ProviderResponse {
                    content: "late".into(),
                    tool_calls: vec![],
                    stop_reason: StopReason::Stop,
                    usage: None,
                }),
            }
        }
    }

    struct SlowStreamingProvider;

    #[async_trait]
    impl Provider for SlowStreamingProvider {
        fn provider_name(&self) -> &str {
            "slow-streaming"
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn create_response(
            &self,
            _messages: &[ProjectedMessage],
            _tools: &[ToolSchema],
            _model: &str,
            _cancellation: &CancellationSignal,
        ) -> Result<ProviderResponse> {
            unreachable!("this provider only exercises the streaming path")
        }

        async fn create_streaming_response(
            &self,
            _messages: &[ProjectedMessage],
            _tools: &[ToolSchema],
            _model: &str,
            cancellation: &CancellationSignal,
            sink: &mut dyn StreamSink,
        ) -> Result<ProviderResponse> {
            sink.on_token("partial");
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(Error::Aborted),
                _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(ProviderResponse {
                    content: "never".into(),
                    tool_calls: vec![],
                    stop_reason: StopReason::Stop,
                    usage: None,
                }),
            }
        }
    }

    fn test_options() -> AgentOptions {
        AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap()
    }

    fn allow_all_executor() -> Executor {
        Executor::new(
            Arc::new(FixedApproval(Decision::AllowOnce)),
            crate::approval::PolicyTable::new(ApprovalLevel::Allow),
        )
    }

    fn event_kind_labels(events: &[crate::types::Event]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind.label()).collect()
    }

    #[tokio::test]
    async fn s1_hello_turn_produces_expected_log_and_event_order() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse {
            content: "Hi".into(),
            tool_calls: vec![],
            stop_reason: StopReason::Stop,
            usage: Some(ProviderUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        );

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        agent.subscribe(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });

        agent.send_message("Hello").await.unwrap();

        let events = event_log.events(&thread_id).await.unwrap();
        assert_eq!(event_kind_labels(&events), vec!["USER_MESSAGE", "AGENT_MESSAGE"]);

        let log = seen.lock().unwrap();
        let turn_start = log.iter().position(|l| l.contains("TurnStart")).unwrap();
        let thinking_start = log
            .iter()
            .position(|l| l.contains("AgentThinkingStart"))
            .unwrap();
        let response_complete = log
            .iter()
            .position(|l| l.contains("AgentResponseComplete"))
            .unwrap();
        let turn_complete = log.iter().position(|l| l.contains("TurnComplete")).unwrap();
        let conversation_complete = log
            .iter()
            .position(|l| l.contains("ConversationComplete"))
            .unwrap();
        assert!(turn_start < thinking_start);
        assert!(thinking_start < response_complete);
        assert!(response_complete < turn_complete);
        assert!(turn_complete < conversation_complete);
    }

    #[tokio::test]
    async fn s2_one_tool_turn_appends_call_and_result_before_second_response() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![ProviderToolCall {
                    id: "c1".into(),
                    name: "mock".into(),
                    arguments: serde_json::json!({"action": "x"}),
                }],
                stop_reason: StopReason::ToolCalls,
                usage: None,
            },
            ProviderResponse {
                content: "done".into(),
                tool_calls: vec![],
                stop_reason: StopReason::Stop,
                usage: None,
            },
        ]));

        let mut executor = allow_all_executor();
        executor.register(Arc::new(
            tool("mock", "mock tool")
                .param("action", ParamType::String, "action", false)
                .handler(|_args, _ctx| async { ToolResult::ok("ok") })
                .build()
                .unwrap(),
        ));

        let agent = Agent::new(event_log.clone(), thread_id.clone(), provider, executor, test_options());

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        agent.subscribe(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });

        agent.send_message("do x").await.unwrap();

        let events = event_log.events(&thread_id).await.unwrap();
        assert_eq!(
            event_kind_labels(&events),
            vec![
                "USER_MESSAGE",
                "AGENT_MESSAGE",
                "TOOL_CALL",
                "TOOL_RESULT",
                "AGENT_MESSAGE"
            ]
        );

        let log = seen.lock().unwrap();
        assert_eq!(log.iter().filter(|l| l.contains("ToolCallStart")).count(), 1);
        assert_eq!(log.iter().filter(|l| l.contains("ToolCallComplete")).count(), 1);
        assert_eq!(
            log.iter().filter(|l| l.contains("ConversationComplete")).count(),
            1
        );
    }

    #[tokio::test]
    async fn tokens_in_accumulates_tool_result_characters_alongside_user_input() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderResponse {
                content: String::new(),
                tool_calls: vec![ProviderToolCall {
                    id: "c1".into(),
                    name: "mock".into(),
                    arguments: serde_json::json!({"action": "x"}),
                }],
                stop_reason: StopReason::ToolCalls,
                usage: None,
            },
            ProviderResponse {
                content: "done".into(),
                tool_calls: vec![],
                stop_reason: StopReason::Stop,
                usage: None,
            },
        ]));

        let mut executor = allow_all_executor();
        let tool_output = "a".repeat(400); // 100 estimated tokens
        executor.register(Arc::new(
            tool("mock", "mock tool")
                .param("action", ParamType::String, "action", false)
                .handler({
                    let tool_output = tool_output.clone();
                    move |_args, _ctx| {
                        let tool_output = tool_output.clone();
                        async move { ToolResult::ok(tool_output) }
                    }
                })
                .build()
                .unwrap(),
        ));

        let user_input = "hi"; // 1 estimated token
        let agent = Agent::new(event_log.clone(), thread_id.clone(), provider, executor, test_options());

        let turn_complete = Arc::new(StdMutex::new(None));
        let turn_complete_clone = turn_complete.clone();
        agent.subscribe(move |event| {
            if let LifecycleEvent::TurnComplete { metrics, .. } = event {
                *turn_complete_clone.lock().unwrap() = Some(metrics.clone());
            }
        });

        agent.send_message(user_input).await.unwrap();

        let metrics = turn_complete.lock().unwrap().clone().unwrap();
        let expected = estimate_tokens(user_input) + estimate_tokens(&tool_output);
        assert_eq!(metrics.tokens_in, expected);
    }

    #[tokio::test]
    async fn provider_returning_empty_content_and_no_tools_still_completes_the_conversation() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse {
            content: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::Stop,
            usage: None,
        }]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        );
        agent.send_message("hi").await.unwrap();
        let events = event_log.events(&thread_id).await.unwrap();
        assert_eq!(event_kind_labels(&events), vec!["USER_MESSAGE", "AGENT_MESSAGE"]);
        assert!(matches!(&events[1].kind, EventKind::AgentMessage{content, ..} if content.is_empty()));
    }

    #[tokio::test]
    async fn empty_user_input_appends_nothing_and_starts_no_turn() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        );
        agent.send_message("   ").await.unwrap();
        let events = event_log.events(&thread_id).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(agent.get_current_state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn unknown_slash_command_surfaces_via_ui_without_touching_the_log() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![]));

        struct RecordingUi(StdMutex<Vec<String>>);
        impl CommandUi for RecordingUi {
            fn display(&self, text: &str) {
                self.0.lock().unwrap().push(text.to_string());
            }
        }
        let ui = Arc::new(RecordingUi(StdMutex::new(Vec::new())));

        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        )
        .with_ui(ui.clone());

        agent.send_message("/nope").await.unwrap();
        let events = event_log.events(&thread_id).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(ui.0.lock().unwrap()[0], "Unknown command: nope");
    }

    #[tokio::test]
    async fn provider_failure_emits_error_and_turn_complete_and_returns_err() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![])); // exhausted immediately
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        );

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        agent.subscribe(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });

        let result = agent.send_message("hello").await;
        assert!(result.is_err());

        let events = event_log.events(&thread_id).await.unwrap();
        assert_eq!(event_kind_labels(&events), vec!["USER_MESSAGE"]); // no dangling AGENT_MESSAGE

        let log = seen.lock().unwrap();
        assert!(log.iter().any(|l| l.contains("Error")));
        assert!(log.iter().any(|l| l.contains("TurnComplete")));
        assert_eq!(agent.get_current_state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn abort_before_any_token_is_treated_as_a_provider_failure_not_turn_aborted() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(SlowProvider);
        let agent = Arc::new(Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        ));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        agent.subscribe(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });

        let agent_clone = agent.clone();
        let handle = tokio::spawn(async move { agent_clone.send_message("hi").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cancelled = agent.abort();
        assert!(cancelled);

        let result = handle.await.unwrap();
        assert!(result.is_err());

        let log = seen.lock().unwrap();
        assert!(log.iter().any(|l| l.contains("TurnComplete")));
        assert!(!log.iter().any(|l| l.contains("TurnAborted")));
    }

    #[tokio::test]
    async fn abort_after_first_token_emits_turn_aborted() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(SlowStreamingProvider);
        let mut options = test_options();
        options.streaming_enabled = true;
        let agent = Arc::new(Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            options,
        ));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        agent.subscribe(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });

        let agent_clone = agent.clone();
        let handle = tokio::spawn(async move { agent_clone.send_message("hi").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cancelled = agent.abort();
        assert!(cancelled);

        let result = handle.await.unwrap();
        assert!(result.is_ok());

        let log = seen.lock().unwrap();
        assert!(log.iter().any(|l| l.contains("TurnAborted")));
        assert!(!log.iter().any(|l| l.contains("TurnComplete")));
    }

    #[tokio::test]
    async fn p4_concurrent_starts_seed_exactly_once() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut options = test_options();
        options.system_prompt = Some("system".into());
        options.user_system_prompt = Some("user-system".into());
        let agent = Arc::new(Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            options,
        ));

        let a = agent.clone();
        let b = agent.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { a.start().await }),
            tokio::spawn(async move { b.start().await })
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        let events = event_log.events(&thread_id).await.unwrap();
        let system_count = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::SystemPrompt(_)))
            .count();
        let user_system_count = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::UserSystemPrompt(_)))
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(user_system_count, 1);
    }

    #[tokio::test]
    async fn s4_compact_creates_a_new_thread_with_a_single_summary_message() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("old-thread");
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderResponse {
                content: "first".into(),
                tool_calls: vec![],
                stop_reason: StopReason::Stop,
                usage: None,
            },
            ProviderResponse {
                content: "summary of the conversation".into(),
                tool_calls: vec![],
                stop_reason: StopReason::Stop,
                usage: None,
            },
        ]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        );

        agent.send_message("hello").await.unwrap();
        let old_events_before = event_log.events(&thread_id).await.unwrap();

        agent.send_message("/compact").await.unwrap();

        let old_events_after = event_log.events(&thread_id).await.unwrap();
        assert_eq!(old_events_before, old_events_after); // untouched by compact

        let new_thread = agent.get_thread_id();
        assert_ne!(new_thread, thread_id);
        let new_events = event_log.events(&new_thread).await.unwrap();
        assert_eq!(event_kind_labels(&new_events), vec!["AGENT_MESSAGE"]);
        assert!(
            matches!(&new_events[0].kind, EventKind::AgentMessage { content, .. } if content == "summary of the conversation")
        );
    }

    #[tokio::test]
    async fn queued_message_triggers_a_fresh_turn_after_the_current_one_completes() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderResponse {
                content: "first".into(),
                tool_calls: vec![],
                stop_reason: StopReason::Stop,
                usage: None,
            },
            ProviderResponse {
                content: "second".into(),
                tool_calls: vec![],
                stop_reason: StopReason::Stop,
                usage: None,
            },
        ]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        );

        agent
            .queue_message("queued text", QueueMessageType::User, None)
            .await;
        agent.send_message("hello").await.unwrap();

        let events = event_log.events(&thread_id).await.unwrap();
        assert_eq!(
            event_kind_labels(&events),
            vec!["USER_MESSAGE", "AGENT_MESSAGE", "USER_MESSAGE", "AGENT_MESSAGE"]
        );
        assert!(matches!(&events[2].kind, EventKind::UserMessage(t) if t == "queued text"));
        assert_eq!(agent.get_queue_stats().await.queue_length, 0);
    }

    #[tokio::test]
    async fn user_prompt_submit_hook_can_rewrite_the_stored_user_message() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse {
            content: "ack".into(),
            tool_calls: vec![],
            stop_reason: StopReason::Stop,
            usage: None,
        }]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        )
        .with_hooks(Hooks::new().on_user_prompt_submit(|_event| async {
            Some(HookDecision::ModifyPrompt("rewritten".into()))
        }));

        agent.send_message("original").await.unwrap();
        let events = event_log.events(&thread_id).await.unwrap();
        assert!(matches!(&events[0].kind, EventKind::UserMessage(t) if t == "rewritten"));
    }

    #[tokio::test]
    async fn user_prompt_submit_hook_can_block_before_anything_is_appended() {
        let event_log = Arc::new(InMemoryEventLog::new());
        let thread_id = ThreadId::new("t1");
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let agent = Agent::new(
            event_log.clone(),
            thread_id.clone(),
            provider,
            allow_all_executor(),
            test_options(),
        )
        .with_hooks(
            Hooks::new()
                .on_user_prompt_submit(|_event| async { Some(HookDecision::Block("nope".into())) }),
        );

        agent.send_message("hello").await.unwrap();
        let events = event_log.events(&thread_id).await.unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn strip_think_blocks_removes_thinking_but_keeps_surrounding_text() {
        let content = "before <think>internal reasoning</think> after";
        assert_eq!(strip_think_blocks(content), "before  after");
    }

    #[test]
    fn strip_think_blocks_is_a_no_op_without_a_think_tag() {
        assert_eq!(strip_think_blocks("plain text"), "plain text");
    }

    #[test]
    fn r1_token_accounting_sum_matches_latest_thread_total() {
        let mut totals = (0u64, 0u64);
        let per_turn_completion = [5u64, 7, 3];
        for completion in per_turn_completion {
            totals.1 += completion;
        }
        let sum: u64 = per_turn_completion.iter().sum();
        assert_eq!(sum, totals.1);
    }
}
