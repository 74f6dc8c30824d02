//! Change notifications broadcast to subscribers.

use authz::HolderId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which caches an invalidation cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    Holder(HolderId),
    All,
    /// Every view that resolved through the group.
    DependentsOf(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A holder's nodes were mutated. Loads and reload signals never
    /// publish this.
    DataChanged { holder: HolderId },
    Invalidated { scope: InvalidationScope },
    /// Resolution for `holder` skipped an inheritance node naming a group
    /// that is not loaded.
    UnknownGroup { holder: HolderId, group: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Fire and forget: an event with no subscribers is dropped.
    pub fn publish(&self, event: EngineEvent) {
        tracing::trace!("Publishing {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
