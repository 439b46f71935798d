//! Lifecycle events and the `Observable` fan-out pattern the UI
//! subscriber interface is built on.
//!
//! Modeled as a capability rather than inheritance: `Observable` holds
//! an append-only list of subscriber closures and isolates each one —
//! the engine must not be taken down by a misbehaving subscriber.

use crate::types::{AgentState, CurrentTurnMetrics, Event, ThreadId, ToolResult};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

/// Context attached to an `error` lifecycle event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub phase: Option<String>,
    pub operation: Option<String>,
    pub thread_id: Option<ThreadId>,
}

impl ErrorContext {
    pub fn phase(phase: impl Into<String>) -> Self {
        ErrorContext {
            phase: Some(phase.into()),
            ..Default::default()
        }
    }

    pub fn operation(operation: impl Into<String>, thread_id: ThreadId) -> Self {
        ErrorContext {
            operation: Some(operation.into()),
            thread_id: Some(thread_id),
            ..Default::default()
        }
    }
}

/// Every event a UI listener may receive.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChange {
        from: AgentState,
        to: AgentState,
    },
    TurnStart {
        turn_id: String,
        user_input: String,
        metrics: CurrentTurnMetrics,
    },
    TurnProgress {
        metrics: CurrentTurnMetrics,
    },
    TurnComplete {
        turn_id: String,
        metrics: CurrentTurnMetrics,
    },
    TurnAborted {
        turn_id: String,
        metrics: CurrentTurnMetrics,
    },
    AgentThinkingStart,
    AgentThinkingComplete,
    AgentToken {
        token: String,
    },
    AgentResponseComplete {
        content: String,
    },
    ToolCallStart {
        tool_name: String,
        input: Value,
        call_id: String,
    },
    ToolCallComplete {
        tool_name: String,
        result: ToolResult,
        call_id: String,
    },
    ThreadEventAdded {
        event: Event,
    },
    ConversationComplete,
    Error {
        error: String,
        context: ErrorContext,
    },
    RetryAttempt {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    RetryExhausted {
        attempts: u32,
        last_error: String,
    },
}

type Subscriber = dyn Fn(&LifecycleEvent) + Send + Sync;

/// Append-only fan-out of lifecycle notifications. Subscribers are weak
/// collaborators: the engine does not depend on their continued
/// existence, and a panicking subscriber is isolated rather than
/// allowed to unwind into the turn loop.
#[derive(Default)]
pub struct Observable {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
}

impl Observable {
    pub fn new() -> Self {
        Observable::default()
    }

    /// Register a subscriber. Additive-only: there is no unsubscribe.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .expect("observable subscriber lock poisoned")
            .push(Arc::new(subscriber));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("observable subscriber lock poisoned")
            .len()
    }

    /// Deliver `event` to every subscriber in registration order. A
    /// subscriber that panics is caught and logged; it does not stop
    /// delivery to the rest.
    pub fn emit(&self, event: LifecycleEvent) {
        let subscribers = self
            .subscribers
            .read()
            .expect("observable subscriber lock poisoned")
            .clone();
        for subscriber in subscribers {
            let event_ref = &event;
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(event_ref)));
            if outcome.is_err() {
                log::warn!("lifecycle subscriber panicked; isolating it from the turn loop");
            }
        }
    }
}
