//! Inbound signaling events.

use super::event_names;
use crate::errors::SignalingError;
use crate::types::{
    ConsumerId, ConsumerLayers, ConsumerScore, MediaKind, ParticipantId, ProducerId,
    ProducerSource, StreamAction,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of `newConsumer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsumerEvent {
    pub participant_id: ParticipantId,
    pub producer_id: ProducerId,
    pub id: ConsumerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default)]
    pub app_data: Value,
    #[serde(default)]
    pub producer_paused: bool,
}

/// Payload of `consumerClosed`, `consumerPaused` and `consumerResumed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    pub consumer_id: ConsumerId,
}

/// Payload of `consumerScore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScoreEvent {
    pub consumer_id: ConsumerId,
    pub score: ConsumerScore,
}

/// Payload of `layersChanged`. The server sends `null` layers when the
/// consumer currently receives nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayersChangedEvent {
    pub consumer_id: ConsumerId,
    #[serde(default)]
    pub layers: Option<ConsumerLayers>,
}

/// Payload of `producerChanged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerChangedEvent {
    pub source: ProducerSource,
    pub action: StreamAction,
    pub producer_id: ProducerId,
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    NewConsumer(NewConsumerEvent),
    ConsumerClosed(ConsumerRef),
    ConsumerPaused(ConsumerRef),
    ConsumerResumed(ConsumerRef),
    ConsumerScore(ConsumerScoreEvent),
    LayersChanged(LayersChangedEvent),
    ProducerChanged(ProducerChangedEvent),
}

impl SignalingEvent {
    /// Decode the payload of the named event.
    pub fn decode(event_name: &str, payload: Value) -> Result<Self, SignalingError> {
        let event = match event_name {
            event_names::NEW_CONSUMER => Self::NewConsumer(from_payload(event_name, payload)?),
            event_names::CONSUMER_CLOSED => {
                Self::ConsumerClosed(from_payload(event_name, payload)?)
            }
            event_names::CONSUMER_PAUSED => {
                Self::ConsumerPaused(from_payload(event_name, payload)?)
            }
            event_names::CONSUMER_RESUMED => {
                Self::ConsumerResumed(from_payload(event_name, payload)?)
            }
            event_names::CONSUMER_SCORE => Self::ConsumerScore(from_payload(event_name, payload)?),
            event_names::LAYERS_CHANGED => Self::LayersChanged(from_payload(event_name, payload)?),
            event_names::PRODUCER_CHANGED => {
                Self::ProducerChanged(from_payload(event_name, payload)?)
            }
            other => {
                return Err(SignalingError::InvalidResponse(format!(
                    "unsupported event: {other}"
                )))
            }
        };
        Ok(event)
    }

    /// Wire name of the event (bounded, safe as a metric label).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewConsumer(_) => event_names::NEW_CONSUMER,
            Self::ConsumerClosed(_) => event_names::CONSUMER_CLOSED,
            Self::ConsumerPaused(_) => event_names::CONSUMER_PAUSED,
            Self::ConsumerResumed(_) => event_names::CONSUMER_RESUMED,
            Self::ConsumerScore(_) => event_names::CONSUMER_SCORE,
            Self::LayersChanged(_) => event_names::LAYERS_CHANGED,
            Self::ProducerChanged(_) => event_names::PRODUCER_CHANGED,
        }
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(
    event_name: &str,
    payload: Value,
) -> Result<T, SignalingError> {
    serde_json::from_value(payload)
        .map_err(|e| SignalingError::InvalidResponse(format!("{event_name}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_new_consumer() {
        let event = SignalingEvent::decode(
            "newConsumer",
            json!({
                "participantId": "alice",
                "producerId": "producer-1",
                "id": "consumer-1",
                "kind": "video",
                "rtpParameters": { "codecs": [] },
                "type": "simulcast",
                "appData": { "source": "webcam" },
                "producerPaused": false
            }),
        )
        .unwrap();

        let SignalingEvent::NewConsumer(payload) = &event else {
            panic!("expected NewConsumer, got {event:?}");
        };
        assert_eq!(payload.id, ConsumerId::new("consumer-1"));
        assert_eq!(payload.participant_id, ParticipantId::new("alice"));
        assert_eq!(payload.kind, MediaKind::Video);
        assert_eq!(payload.app_data, json!({ "source": "webcam" }));
        assert_eq!(event.name(), "newConsumer");
    }

    #[test]
    fn test_decode_layers_changed_with_null_layers() {
        let event = SignalingEvent::decode(
            "layersChanged",
            json!({ "consumerId": "c1", "layers": null }),
        )
        .unwrap();

        assert_eq!(
            event,
            SignalingEvent::LayersChanged(LayersChangedEvent {
                consumer_id: ConsumerId::new("c1"),
                layers: None,
            })
        );
    }

    #[test]
    fn test_decode_producer_changed() {
        let event = SignalingEvent::decode(
            "producerChanged",
            json!({ "source": "mic", "action": "pause", "producerId": "p1" }),
        )
        .unwrap();

        assert_eq!(event.name(), "producerChanged");
        assert!(matches!(
            event,
            SignalingEvent::ProducerChanged(ProducerChangedEvent {
                source: ProducerSource::Mic,
                action: StreamAction::Pause,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_malformed_payload() {
        let result = SignalingEvent::decode("consumerScore", json!({ "consumerId": "c1" }));
        assert!(
            matches!(result, Err(SignalingError::InvalidResponse(msg)) if msg.starts_with("consumerScore"))
        );
    }

    #[test]
    fn test_decode_unknown_event() {
        let result = SignalingEvent::decode("chatMessage", json!({}));
        assert!(result.is_err());
    }
}
