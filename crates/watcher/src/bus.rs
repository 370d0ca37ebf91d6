//! Event bus for classified changes and scoped errors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;
use warden_core::ChangeRecord;

/// Everything subscribers can observe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum WatchEvent {
    /// A settled path was classified ADD, CHANGE or UNLINK
    #[serde(rename = "change")]
    Changed(ChangeRecord),
    /// A failure scoped to one path or one root
    #[serde(rename = "error")]
    Errored(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub scope: ErrorScope,
    pub cause: String,
}

/// What an error applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "lowercase")]
pub enum ErrorScope {
    /// A single file that could not be read
    Path(PathBuf),
    /// A whole watched root whose native watch failed
    Root(PathBuf),
}

/// Which events a handler wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Change,
    Error,
    All,
}

impl EventFilter {
    fn accepts(&self, event: &WatchEvent) -> bool {
        matches!(
            (self, event),
            (EventFilter::All, _)
                | (EventFilter::Change, WatchEvent::Changed(_))
                | (EventFilter::Error, WatchEvent::Errored(_))
        )
    }
}

/// Broadcast fan-out to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WatchEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before it lags
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns a receiver for all events. Dropping it unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }

    /// Run `handler` for every matching event until unsubscribed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let mut receiver = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if filter.accepts(&event) => handler(&event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Event handler lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }

    pub fn publish(&self, event: WatchEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn change(&self, record: ChangeRecord) {
        self.publish(WatchEvent::Changed(record));
    }

    pub fn error(&self, scope: ErrorScope, cause: impl Into<String>) {
        self.publish(WatchEvent::Errored(ErrorEvent {
            scope,
            cause: cause.into(),
        }));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handle for a handler registered with [`EventBus::on`]
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering events to the handler
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}
