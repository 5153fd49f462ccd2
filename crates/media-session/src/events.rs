//! Session event bus.
//!
//! Notifies the UI/business layer of session changes. Events carry ids
//! only; subscribers query the session handle for current state.

use crate::types::{ConsumerId, ProducerId, ProducerSource, StreamAction};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A change the UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// A consumer was added to or removed from the registry.
    ConsumersChanged,
    /// A consumer was paused, resumed or closed.
    #[serde(rename_all = "camelCase")]
    ConsumerUpdated { consumer_id: ConsumerId },
    /// The server changed one of our producers.
    #[serde(rename_all = "camelCase")]
    ProducerChanged {
        source: ProducerSource,
        action: StreamAction,
        producer_id: ProducerId,
    },
    /// Score or layers of a consumer changed.
    #[serde(rename_all = "camelCase")]
    StatusInfoUpdated { consumer_id: ConsumerId },
}

/// Broadcast publish point for [`SessionEvent`]s.
///
/// Slow subscribers lose the oldest events (`RecvError::Lagged`) and should
/// re-query the session.
#[derive(Debug, Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers reached; zero
    /// subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
