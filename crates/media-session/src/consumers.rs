//! Consumer registry.
//!
//! Owns every inbound consumer and its status side-record. Mutated only by
//! the session actor, so no locking.
//!
//! Every operation keyed by consumer id tolerates unknown ids: remote events
//! can arrive after local teardown, and that race is expected. Such calls
//! return `false`/`None` and change nothing.

use crate::engine::MediaConsumer;
use crate::types::{
    ConsumerId, ConsumerLayers, ConsumerScore, MediaKind, ParticipantId, ProducerId, TransportId,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Status of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerStatus {
    Active,
    Paused,
    Closed,
}

/// Volatile per-consumer telemetry.
///
/// `score` and `current_layers` come from the server and are cleared on
/// pause; `preferred_layers` is the last layer request the server accepted
/// and survives pause/resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatusInfo {
    pub score: Option<ConsumerScore>,
    pub current_layers: Option<ConsumerLayers>,
    pub preferred_layers: Option<ConsumerLayers>,
}

/// Read-only view of a registered consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSnapshot {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub participant_id: ParticipantId,
    pub kind: MediaKind,
    pub status: ConsumerStatus,
    pub transport_id: TransportId,
    pub producer_paused: bool,
    pub app_data: Value,
}

struct ConsumerEntry {
    consumer: Arc<dyn MediaConsumer>,
    participant_id: ParticipantId,
    transport_id: TransportId,
    status: ConsumerStatus,
    producer_paused: bool,
    info: ConsumerStatusInfo,
    seq: u64,
}

impl ConsumerEntry {
    fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            id: self.consumer.id().clone(),
            producer_id: self.consumer.producer_id().clone(),
            participant_id: self.participant_id.clone(),
            kind: self.consumer.kind(),
            status: self.status,
            transport_id: self.transport_id.clone(),
            producer_paused: self.producer_paused,
            app_data: self.consumer.app_data().clone(),
        }
    }
}

/// Registry of inbound consumers.
#[derive(Default)]
pub struct ConsumerRegistry {
    entries: HashMap<ConsumerId, ConsumerEntry>,
    next_seq: u64,
}

impl ConsumerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer created for a remote "new consumer" event.
    ///
    /// A second event with the same id replaces the entry; the stale local
    /// consumer is closed. Returns `true` (the registry always changes).
    pub fn add_or_update_from_remote(
        &mut self,
        consumer: Arc<dyn MediaConsumer>,
        participant_id: ParticipantId,
        transport_id: TransportId,
        producer_paused: bool,
    ) -> bool {
        let id = consumer.id().clone();
        let incoming = Arc::clone(&consumer);
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = ConsumerEntry {
            consumer,
            participant_id,
            transport_id,
            status: ConsumerStatus::Active,
            producer_paused,
            info: ConsumerStatusInfo::default(),
            seq,
        };

        if let Some(stale) = self.entries.insert(id.clone(), entry) {
            debug!(
                target: "media.session.consumers",
                consumer_id = %id,
                "Replacing consumer with duplicate id"
            );
            if !Arc::ptr_eq(&stale.consumer, &incoming) {
                stale.consumer.close();
            }
        }
        true
    }

    /// Close and remove a consumer; its status record goes with it.
    pub fn remove(&mut self, id: &ConsumerId) -> Option<ConsumerSnapshot> {
        let mut entry = self.entries.remove(id)?;
        entry.consumer.close();
        entry.status = ConsumerStatus::Closed;
        Some(entry.snapshot())
    }

    /// Pause in place. Score and current layers become stale and are cleared;
    /// preferred layers are kept.
    pub fn pause(&mut self, id: &ConsumerId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.consumer.pause();
        entry.status = ConsumerStatus::Paused;
        entry.info.score = None;
        entry.info.current_layers = None;
        true
    }

    /// Resume in place. Cleared telemetry is not restored; the server
    /// re-delivers it.
    pub fn resume(&mut self, id: &ConsumerId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.consumer.resume();
        entry.status = ConsumerStatus::Active;
        true
    }

    #[must_use]
    pub fn get(&self, id: &ConsumerId) -> Option<ConsumerSnapshot> {
        self.entries.get(id).map(ConsumerEntry::snapshot)
    }

    /// All consumers in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<ConsumerSnapshot> {
        let mut entries: Vec<&ConsumerEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(ConsumerEntry::snapshot).collect()
    }

    #[must_use]
    pub fn get_status(&self, id: &ConsumerId) -> Option<ConsumerStatusInfo> {
        self.entries.get(id).map(|e| e.info.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &ConsumerId) -> bool {
        self.entries.contains_key(id)
    }

    /// Record a server-reported score. Status is left alone.
    pub fn update_score(&mut self, id: &ConsumerId, score: ConsumerScore) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.info.score = Some(score);
        true
    }

    /// Record server-reported current layers. Accepted for paused consumers
    /// too (last writer wins). Status is left alone.
    pub fn update_current_layers(
        &mut self,
        id: &ConsumerId,
        layers: Option<ConsumerLayers>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.info.current_layers = layers;
        true
    }

    /// Cache the layers the server accepted as preferred.
    pub fn set_preferred_layers(&mut self, id: &ConsumerId, layers: ConsumerLayers) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.info.preferred_layers = Some(layers);
        true
    }

    /// Cached preferred layers. Outer `None` means the consumer is unknown.
    #[must_use]
    pub fn preferred_layers(&self, id: &ConsumerId) -> Option<Option<ConsumerLayers>> {
        self.entries.get(id).map(|e| e.info.preferred_layers)
    }

    /// Drop every consumer that lived on a closed transport, without a
    /// remote round-trip.
    pub fn remove_for_transport(&mut self, transport_id: &TransportId) -> Vec<ConsumerId> {
        let ids: Vec<ConsumerId> = self
            .entries
            .iter()
            .filter(|(_, e)| &e.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(entry) = self.entries.remove(id) {
                entry.consumer.close();
            }
        }
        ids
    }

    /// Close and drop everything. Returns how many consumers were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.consumer.close();
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
