//! The append-only, per-thread event log.
//!
//! This is the storage seam: the core ships a single in-memory
//! implementation and a trait any durable backend can implement.
//! Sequence numbers are gap-free per thread; concurrent readers always
//! observe some valid prefix of the appends made so far.

use crate::error::{Error, Result};
use crate::types::{Event, EventKind, ThreadId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::RwLock;

/// Storage seam for a thread's event log. The core does not mandate a
/// persistence mechanism; it only requires that appends are ordered and
/// that reads see a prefix-consistent view.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Mint a fresh, unused thread id.
    async fn generate_thread_id(&self) -> ThreadId;

    /// Register a thread so `events()` returns `Ok(vec![])` rather than
    /// failing for it. Idempotent.
    async fn create_thread(&self, id: ThreadId) -> Result<()>;

    /// Append one event, assigning it the next sequence number for this
    /// thread. Auto-vivifies the thread if it hasn't been created yet.
    async fn append(&self, thread_id: &ThreadId, kind: EventKind) -> Result<Event>;

    /// Ordered view of every event appended to this thread so far.
    async fn events(&self, thread_id: &ThreadId) -> Result<Vec<Event>>;

    /// Release any resources held by the backend. A no-op for the
    /// in-memory implementation.
    async fn close(&self) -> Result<()>;
}

/// In-memory [`EventLog`]. Durable only for the lifetime of the process;
/// exists so the core is runnable and testable without a real backend.
#[derive(Default)]
pub struct InMemoryEventLog {
    threads: RwLock<HashMap<ThreadId, Vec<Event>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        InMemoryEventLog {
            threads: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn generate_thread_id(&self) -> ThreadId {
        // rand rather than a UUID crate: `rand` is already a dependency
        // (used for retry jitter) and nothing here needs UUID's
        // structure, only uniqueness.
        let raw: u64 = rand::random();
        ThreadId::new(format!("thread-{raw:016x}"))
    }

    async fn create_thread(&self, id: ThreadId) -> Result<()> {
        let mut threads = self.threads.write().await;
        threads.entry(id).or_insert_with(Vec::new);
        Ok(())
    }

    async fn append(&self, thread_id: &ThreadId, kind: EventKind) -> Result<Event> {
        let mut threads = self.threads.write().await;
        let log = threads.entry(thread_id.clone()).or_insert_with(Vec::new);
        let seq = log.len() as u64;
        let event = Event {
            seq,
            timestamp: SystemTime::now(),
            kind,
        };
        log.push(event.clone());
        log::debug!(
            "thread {thread_id}: appended {} at seq {seq}",
            event.kind.label()
        );
        Ok(event)
    }

    async fn events(&self, thread_id: &ThreadId) -> Result<Vec<Event>> {
        let threads = self.threads.read().await;
        match threads.get(thread_id) {
            Some(log) => Ok(log.clone()),
            None => Err(Error::Storage(format!("unknown thread: {thread_id}"))),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
