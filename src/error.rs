//! # Error taxonomy
//!
//! The categories named in the error-handling design map onto
//! this enum as follows:
//!
//! - `ValidationError`, `ApprovalDenied`, `ToolExecutionError` never reach
//!   this type at the public API boundary — the [`crate::executor::Executor`]
//!   traps all three into a [`crate::types::ToolResult`] with `is_error: true`.
//!   `Error::Tool` exists for the Executor's own internal plumbing before
//!   that wrapping happens.
//! - `ProviderTransientError` is retried internally by [`crate::retry`] and
//!   likewise never escapes as an `Err` the caller sees.
//! - `ProviderFatalError` surfaces as `Error::Provider`.
//! - `StorageError` surfaces as `Error::Storage`.
//! - `AbortError` surfaces as `Error::Aborted` only for the
//!   before-first-token case; after-first-token cancellation is
//!   a `turn_aborted` lifecycle event, not an `Err`.
//! - `CommandError` surfaces as `Error::Command`.

use thiserror::Error;

/// Type alias for `Result<T, Error>` used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type covering every failure mode the core surfaces
/// as an `Err` rather than as a lifecycle event or `ToolResult`.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failure talking to a provider (connection refused,
    /// DNS, TLS, timeouts). Auto-converted via `?` from `reqwest::Error`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure — malformed provider payload, bad
    /// tool arguments, etc. Auto-converted via `?` from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration supplied when building `AgentOptions` or an
    /// `EffectiveConfiguration`.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A provider request failed fatally: auth/4xx, or a transient failure
    /// that exhausted its retry budget.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Failure while parsing or consuming a streaming provider response.
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Internal tool-registry/execution failure, trapped into a
    /// `ToolResult` by the Executor before it ever reaches a caller.
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Event-log I/O failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unknown slash-command or command-handler failure. Surfaced to the
    /// UI only; no events are appended.
    #[error("Command error: {0}")]
    Command(String),

    /// Cooperative cancellation observed before any output was produced
    /// (abort before first token is retriable by the caller).
    #[error("Operation aborted")]
    Aborted,

    /// Request exceeded a provider-configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// Catch-all for conditions that don't fit the categories above.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Error::Command(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// True for failures the retry policy should retry:
    /// network/timeout/5xx. 4xx auth failures are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => match e.status() {
                Some(status) => status.is_server_error(),
                None => true, // connect/timeout errors carry no status
            },
            Error::Timeout => true,
            Error::Stream(_) => false,
            _ => false,
        }
    }
}
