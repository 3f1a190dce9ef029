//! In-process fan-out of scheduling events: hashlist completion, job
//! terminal transitions, and the other domain events the daemon raises.

use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`subscribe`] creates a new receiver that will receive all
/// events published after the subscription was created. The bus is
/// thread-safe and can be cloned cheaply (it wraps its internals in an `Arc`).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<DomainEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end. The returned
    /// `Receiver` sees every event published from this point forward.
    pub fn subscribe(&self) -> flume::Receiver<DomainEvent> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish an event to all current subscribers, pruning any whose
    /// receiver has been dropped.
    pub fn publish(&self, event: DomainEvent) {
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduling-level events other components react to without a direct
/// dependency on whichever component raised them.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    HashlistFullyCracked { hashlist_id: i64 },
    JobCompleted { job_id: Uuid },
    JobFailed { job_id: Uuid, reason: String },
    AgentWentStale { agent_id: i64 },
    AgentReconnected { agent_id: i64 },
}
