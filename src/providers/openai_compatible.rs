//! Concrete [`Provider`] adapter for any OpenAI-compatible `/chat/completions`
//! endpoint (LM Studio, Ollama, llama.cpp, vLLM — see [`crate::config::Provider`]).
//!
//! A `reqwest::Client` held across calls, JSON request/response bodies,
//! and SSE-driven streaming via `eventsource-stream`.

use crate::cancellation::CancellationSignal;
use crate::error::{Error, Result};
use crate::events::{LifecycleEvent, Observable};
use crate::provider::{
    Provider, ProviderResponse, ProviderToolCall, StopReason, StreamSink, ToolSchema,
};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::types::{ProjectedMessage, ProviderUsage, Role};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

/// Talks to one OpenAI-compatible endpoint. `retry` governs the
/// connect/send phase only: once SSE bytes start arriving,
/// failures propagate rather than re-issuing the request.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    events: Option<Arc<Observable>>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        OpenAiCompatibleProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            retry: RetryConfig::default(),
            events: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share an event-emission handle so `retry_attempt`/`retry_exhausted`
    /// lifecycle events reach the same subscribers as the Agent's own
    /// turn-loop events (see [`crate::Agent::with_observable`]).
    pub fn with_events(mut self, events: Arc<Observable>) -> Self {
        self.events = Some(events);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_payload(
        messages: &[ProjectedMessage],
        tools: &[ToolSchema],
        model: &str,
        stream: bool,
    ) -> Value {
        let wire_messages: Vec<Value> = messages.iter().map(message_to_wire).collect();
        let mut payload = json!({
            "model": model,
            "messages": wire_messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            payload["tools"] = Value::Array(wire_tools);
        }
        payload
    }

    async fn send(&self, payload: &Value, cancellation: &CancellationSignal) -> Result<reqwest::Response> {
        let endpoint = self.endpoint();
        let events = self.events.as_ref();
        retry_with_backoff(
            &self.retry,
            cancellation,
            Error::is_retryable,
            |attempt, delay, err| {
                log::warn!("provider request attempt {attempt} failed ({err}); retrying in {delay:?}");
                if let Some(events) = events {
                    events.emit(LifecycleEvent::RetryAttempt {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: err.to_string(),
                    });
                }
            },
            |attempts, err| {
                log::error!("provider request exhausted after {attempts} attempts: {err}");
                if let Some(events) = events {
                    events.emit(LifecycleEvent::RetryExhausted {
                        attempts,
                        last_error: err.to_string(),
                    });
                }
            },
            || async {
                let response = self.client.post(&endpoint).json(payload).send().await?;
                if response.status().is_server_error() {
                    return Err(Error::provider(format!(
                        "server error: {}",
                        response.status()
                    )));
                }
                if response.status().is_client_error() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Other(format!(
                        "client error {status}: {body}"
                    )));
                }
                Ok(response)
            },
        )
        .await
    }
}

fn message_to_wire(message: &ProjectedMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut wire = json!({
        "role": role,
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
        wire["tool_calls"] = Value::Array(calls);
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    wire
}

fn parse_stop_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason {
        Some("stop") => StopReason::Stop,
        Some("tool_calls") => StopReason::ToolCalls,
        Some("length") => StopReason::Length,
        Some(other) => StopReason::Other(other.to_string()),
        None => StopReason::Stop,
    }
}

fn parse_usage(value: &Value) -> Option<ProviderUsage> {
    let usage = value.get("usage")?;
    Some(ProviderUsage {
        prompt_tokens: usage.get("prompt_tokens")?.as_u64().unwrap_or(0),
        completion_tokens: usage.get("completion_tokens")?.as_u64().unwrap_or(0),
        total_tokens: usage.get("total_tokens")?.as_u64().unwrap_or(0),
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ProviderToolCall> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| {
            let id = call.get("id")?.as_str()?.to_string();
            let function = call.get("function")?;
            let name = function.get("name")?.as_str()?.to_string();
            let raw_arguments = function.get("arguments")?.as_str().unwrap_or("{}");
            let arguments = serde_json::from_str(raw_arguments).unwrap_or(json!({}));
            Some(ProviderToolCall {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        "openai_compatible"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn create_response(
        &self,
        messages: &[ProjectedMessage],
        tools: &[ToolSchema],
        model: &str,
        cancellation: &CancellationSignal,
    ) -> Result<ProviderResponse> {
        let payload = Self::build_payload(messages, tools, model, false);
        let response = self.send(&payload, cancellation).await?;
        let body: Value = response.json().await?;
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| Error::provider("response had no choices"))?;
        let message = choice
            .get("message")
            .ok_or_else(|| Error::provider("choice had no message"))?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let tool_calls = parse_tool_calls(message);
        let stop_reason = parse_stop_reason(choice.get("finish_reason").and_then(Value::as_str));
        Ok(ProviderResponse {
            content,
            tool_calls,
            stop_reason,
            usage: parse_usage(&body),
        })
    }

    async fn create_streaming_response(
        &self,
        messages: &[ProjectedMessage],
        tools: &[ToolSchema],
        model: &str,
        cancellation: &CancellationSignal,
        sink: &mut dyn StreamSink,
    ) -> Result<ProviderResponse> {
        let payload = Self::build_payload(messages, tools, model, true);
        let response = self.send(&payload, cancellation).await?;

        let mut content = String::new();
        let mut stop_reason = StopReason::Stop;
        let mut usage = None;
        // Accumulate streamed tool-call fragments by their array index;
        // providers emit a tool call's name/arguments piecemeal across
        // several chunks.
        let mut tool_call_ids: Vec<Option<String>> = Vec::new();
        let mut tool_call_names: Vec<String> = Vec::new();
        let mut tool_call_args: Vec<String> = Vec::new();

        let mut stream = response.bytes_stream().eventsource();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(Error::Aborted),
                next = stream.next() => next,
            };
            let Some(event) = next else { break };
            let event = event.map_err(|e| Error::stream(e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: Value = serde_json::from_str(&event.data)
                .map_err(|e| Error::stream(format!("malformed SSE chunk: {e}")))?;

            if let Some(u) = parse_usage(&chunk) {
                usage = Some(u);
                sink.on_usage_update(u);
            }

            let Some(choice) = chunk.get("choices").and_then(Value::as_array).and_then(|c| c.first())
            else {
                continue;
            };
            if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
                stop_reason = parse_stop_reason(Some(finish));
            }
            let Some(delta) = choice.get("delta") else {
                continue;
            };
            if let Some(fragment) = delta.get("content").and_then(Value::as_str) {
                if !fragment.is_empty() {
                    content.push_str(fragment);
                    sink.on_token(fragment);
                }
            }
            if let Some(deltas) = delta.get("tool_calls").and_then(Value::as_array) {
                for call_delta in deltas {
                    let index = call_delta.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                    while tool_call_ids.len() <= index {
                        tool_call_ids.push(None);
                        tool_call_names.push(String::new());
                        tool_call_args.push(String::new());
                    }
                    if let Some(id) = call_delta.get("id").and_then(Value::as_str) {
                        tool_call_ids[index] = Some(id.to_string());
                    }
                    if let Some(function) = call_delta.get("function") {
                        if let Some(name) = function.get("name").and_then(Value::as_str) {
                            tool_call_names[index].push_str(name);
                        }
                        if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                            tool_call_args[index].push_str(args);
                        }
                    }
                }
            }
        }

        let tool_calls = tool_call_ids
            .into_iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let id = id?;
                let arguments = serde_json::from_str(&tool_call_args[i]).unwrap_or(json!({}));
                Some(ProviderToolCall {
                    id,
                    name: tool_call_names[i].clone(),
                    arguments,
                })
            })
            .collect();

        Ok(ProviderResponse {
            content,
            tool_calls,
            stop_reason,
            usage,
        })
    }
}
