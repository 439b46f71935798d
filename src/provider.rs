//! Provider Contract: the abstract adapter the turn loop
//! depends on instead of any particular vendor.

use crate::cancellation::CancellationSignal;
use crate::error::Result;
use crate::types::{ProjectedMessage, ProviderUsage};
use async_trait::async_trait;
use serde_json::Value;

/// A tool as advertised to a provider: name, description, and its
/// JSON-Schema input shape. Deliberately decoupled from
/// [`crate::tools::Tool`] — a provider only needs the declaration, not
/// the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One tool call a provider asked the Agent to make.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Why a provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

/// The shape every provider call — streaming or not — resolves to
/// (`{content, toolCalls[], stopReason, usage?}`).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ProviderToolCall>,
    pub stop_reason: StopReason,
    pub usage: Option<ProviderUsage>,
}

/// Callbacks a streaming call drives as fragments and usage updates
/// arrive. Kept as plain `FnMut` rather than an async stream: the Agent
/// consumes these synchronously within its own suspension points (spec
/// §5 "Streaming provider events").
pub trait StreamSink: Send {
    fn on_token(&mut self, token: &str);
    fn on_usage_update(&mut self, usage: ProviderUsage);
}

/// Polymorphic over {createResponse, createStreamingResponse (optional),
/// supportsStreaming, providerName}.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// True if this adapter has a genuine streaming implementation.
    /// `false` is not an error — the Agent falls back to
    /// `create_response` and simulates a single-chunk "stream".
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn create_response(
        &self,
        messages: &[ProjectedMessage],
        tools: &[ToolSchema],
        model: &str,
        cancellation: &CancellationSignal,
    ) -> Result<ProviderResponse>;

    /// Default implementation degrades to `create_response` and replays
    /// its full content as a single token, for adapters that only
    /// implement the non-streaming half of the contract.
    async fn create_streaming_response(
        &self,
        messages: &[ProjectedMessage],
        tools: &[ToolSchema],
        model: &str,
        cancellation: &CancellationSignal,
        sink: &mut dyn StreamSink,
    ) -> Result<ProviderResponse> {
        let response = self
            .create_response(messages, tools, model, cancellation)
            .await?;
        if !response.content.is_empty() {
            sink.on_token(&response.content);
        }
        if let Some(usage) = response.usage {
            sink.on_usage_update(usage);
        }
        Ok(response)
    }
}
