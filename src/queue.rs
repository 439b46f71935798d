//! Prioritized inbound message buffer used while the Agent is busy.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessageType {
    User,
    System,
    TaskNotification,
}

impl QueueMessageType {
    fn as_str(&self) -> &'static str {
        match self {
            QueueMessageType::User => "user",
            QueueMessageType::System => "system",
            QueueMessageType::TaskNotification => "task_notification",
        }
    }
}

impl Default for QueueMessageType {
    fn default() -> Self {
        QueueMessageType::User
    }
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: String,
    pub arrived_at: SystemTime,
    pub message_type: QueueMessageType,
    pub text: String,
    pub metadata: Option<Value>,
}

impl QueuedMessage {
    pub fn is_high_priority(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("priority"))
            .and_then(Value::as_str)
            == Some("high")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub queue_length: usize,
    pub high_priority_count: usize,
    pub oldest_message_age: Option<Duration>,
}

/// Buffers messages received while the Agent is busy; the Agent drains
/// it high-priority-first, then FIFO within each priority class, once a
/// turn completes.
#[derive(Default)]
pub struct MessageQueue {
    entries: Mutex<Vec<QueuedMessage>>,
    next_id: AtomicU64,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue::default()
    }

    pub async fn queue_message(
        &self,
        text: impl Into<String>,
        message_type: QueueMessageType,
        metadata: Option<Value>,
    ) -> String {
        let id = format!("qm-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = QueuedMessage {
            id: id.clone(),
            arrived_at: SystemTime::now(),
            message_type,
            text: text.into(),
            metadata,
        };
        self.entries.lock().await.push(entry);
        id
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        let entries = self.entries.lock().await;
        let high_priority_count = entries.iter().filter(|m| m.is_high_priority()).count();
        let oldest_message_age = entries
            .iter()
            .map(|m| m.arrived_at)
            .min()
            .and_then(|t| t.elapsed().ok());
        QueueStats {
            queue_length: entries.len(),
            high_priority_count,
            oldest_message_age,
        }
    }

    /// Remove all entries, or only those matching `filter` if given.
    /// Returns the number removed.
    pub async fn clear_queue(&self, filter: Option<&dyn Fn(&QueuedMessage) -> bool>) -> usize {
        let mut entries = self.entries.lock().await;
        match filter {
            None => {
                let count = entries.len();
                entries.clear();
                count
            }
            Some(predicate) => {
                let before = entries.len();
                entries.retain(|m| !predicate(m));
                before - entries.len()
            }
        }
    }

    /// Remove and return every queued entry, ordered high-priority
    /// first, FIFO within each priority class.
    pub async fn drain_ordered(&self) -> Vec<QueuedMessage> {
        let mut entries = self.entries.lock().await;
        let mut drained: Vec<QueuedMessage> = entries.drain(..).collect();
        drained.sort_by_key(|m| !m.is_high_priority()); // false (high) sorts first; stable keeps FIFO
        drained
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
