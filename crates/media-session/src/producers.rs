//! Remote view of this client's producers.
//!
//! The server reports pause/resume/close of our own producers (a moderator
//! muting us, for instance). The tracker keeps the last report per source;
//! it never initiates anything.

use crate::signaling::ProducerChangedEvent;
use crate::types::{ProducerId, ProducerSource, StreamAction};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Producer status as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerStatus {
    Active,
    Paused,
    Closed,
}

impl From<StreamAction> for ProducerStatus {
    fn from(action: StreamAction) -> Self {
        match action {
            StreamAction::Pause => ProducerStatus::Paused,
            StreamAction::Resume => ProducerStatus::Active,
            StreamAction::Close => ProducerStatus::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerState {
    pub producer_id: ProducerId,
    pub status: ProducerStatus,
}

#[derive(Debug, Default)]
pub struct ProducerLifecycleTracker {
    states: HashMap<ProducerSource, ProducerState>,
}

impl ProducerLifecycleTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `producerChanged` report and return the new state.
    pub fn apply(&mut self, event: &ProducerChangedEvent) -> ProducerState {
        let state = ProducerState {
            producer_id: event.producer_id.clone(),
            status: event.action.into(),
        };
        self.states.insert(event.source, state.clone());
        state
    }

    #[must_use]
    pub fn get(&self, source: ProducerSource) -> Option<&ProducerState> {
        self.states.get(&source)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
