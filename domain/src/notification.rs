//! Notification hub (component C7): a per-request-id reactive stream that
//! emits the terminal status exactly once.
//!
//! Grounded in `saga_testing`'s `InMemoryEventBus`, which already fans a
//! single event out to many subscribers over a `tokio::sync::broadcast`
//! channel; here the channel is scoped per request-id instead of per
//! topic, and a late subscriber is served a cached snapshot instead of a
//! live broadcast.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use futures::Stream;
use saga_core::{SagaRecord, SagaStatus};
use tokio::sync::broadcast;

/// One terminal outcome delivered to subscribers of a request-id.
#[derive(Debug, Clone)]
pub struct TerminalEvent {
    /// The request id this event terminates.
    pub request_id: String,
    /// The terminal status: CONFIRMED, FAILED, or COMPENSATED.
    pub status: SagaStatus,
    /// The saga record at the moment of termination.
    pub snapshot: SagaRecord,
}

struct PendingChannel {
    sender: broadcast::Sender<TerminalEvent>,
}

/// Per-request-id notification hub. The orchestrator calls
/// [`NotificationHub::publish_terminal`] exactly once per request-id;
/// [`NotificationHub::subscribe`] may be called before or after that.
pub struct NotificationHub {
    pending: Mutex<HashMap<String, PendingChannel>>,
    completed: Mutex<HashMap<String, TerminalEvent>>,
    timeout: Duration,
}

impl NotificationHub {
    /// Create a hub whose subscriptions auto-close after `timeout_seconds`
    /// if no terminal event has arrived.
    #[must_use]
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Subscribe to the terminal event for `request_id`.
    ///
    /// If the event was already published, the returned stream yields the
    /// cached snapshot once and completes. Otherwise it yields the event
    /// when [`NotificationHub::publish_terminal`] is next called for this
    /// request-id, or completes empty once the notification timeout
    /// elapses.
    #[must_use]
    pub fn subscribe(&self, request_id: &str) -> Pin<Box<dyn Stream<Item = TerminalEvent> + Send>> {
        #[allow(clippy::unwrap_used)] // hub mutex is never poisoned
        if let Some(event) = self.completed.lock().unwrap().get(request_id).cloned() {
            return Box::pin(futures::stream::once(async move { event }));
        }

        let mut receiver = {
            #[allow(clippy::unwrap_used)] // hub mutex is never poisoned
            let mut pending = self.pending.lock().unwrap();
            let channel = pending.entry(request_id.to_string()).or_insert_with(|| {
                let (sender, _) = broadcast::channel(1);
                PendingChannel { sender }
            });
            channel.sender.subscribe()
        };
        let timeout = self.timeout;

        Box::pin(async_stream::stream! {
            match tokio::time::timeout(timeout, receiver.recv()).await {
                Ok(Ok(event)) => yield event,
                Ok(Err(_)) | Err(_) => {},
            }
        })
    }

    /// Publish the terminal event for `request_id`. Idempotent: a second
    /// call for the same request-id is a no-op, matching the orchestrator's
    /// "exactly once" contract.
    pub fn publish_terminal(&self, event: TerminalEvent) {
        #[allow(clippy::unwrap_used)] // hub mutex is never poisoned
        let mut completed = self.completed.lock().unwrap();
        if completed.contains_key(&event.request_id) {
            return;
        }
        completed.insert(event.request_id.clone(), event.clone());
        drop(completed);

        #[allow(clippy::unwrap_used)] // hub mutex is never poisoned
        if let Some(channel) = self.pending.lock().unwrap().remove(&event.request_id) {
            let _ = channel.sender.send(event);
        }
    }
}
