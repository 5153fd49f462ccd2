//! Server event payloads for tests.
//!
//! Builders return the JSON the SFU sends, so tests exercise the same
//! decoding path as production.

use serde_json::{json, Value};

/// `newConsumer` payload.
#[must_use]
pub fn new_consumer(id: &str, participant_id: &str, producer_id: &str, kind: &str) -> Value {
    json!({
        "participantId": participant_id,
        "producerId": producer_id,
        "id": id,
        "kind": kind,
        "rtpParameters": { "codecs": [], "encodings": [{ "ssrc": 1111 }] },
        "type": "simulcast",
        "appData": { "source": if kind == "audio" { "mic" } else { "webcam" } },
        "producerPaused": false
    })
}

/// `newConsumer` payload for a video consumer from `participant_id`.
#[must_use]
pub fn new_video_consumer(id: &str, participant_id: &str) -> Value {
    new_consumer(id, participant_id, &format!("producer-of-{id}"), "video")
}

/// `newConsumer` payload for an audio consumer from `participant_id`.
#[must_use]
pub fn new_audio_consumer(id: &str, participant_id: &str) -> Value {
    new_consumer(id, participant_id, &format!("producer-of-{id}"), "audio")
}

/// Payload of `consumerClosed`, `consumerPaused` and `consumerResumed`.
#[must_use]
pub fn consumer_ref(id: &str) -> Value {
    json!({ "consumerId": id })
}

/// `consumerScore` payload.
#[must_use]
pub fn consumer_score(id: &str, score: u8, producer_score: u8) -> Value {
    json!({
        "consumerId": id,
        "score": {
            "score": score,
            "producerScore": producer_score,
            "producerScores": [producer_score]
        }
    })
}

/// `layersChanged` payload; `None` spatial means the SFU reported no layers.
#[must_use]
pub fn layers_changed(id: &str, spatial: Option<u8>, temporal: Option<u8>) -> Value {
    let layers = spatial.map_or(Value::Null, |spatial_layer| {
        let mut layers = json!({ "spatialLayer": spatial_layer });
        if let Some(temporal_layer) = temporal {
            layers["temporalLayer"] = json!(temporal_layer);
        }
        layers
    });
    json!({ "consumerId": id, "layers": layers })
}

/// `producerChanged` payload.
#[must_use]
pub fn producer_changed(source: &str, action: &str, producer_id: &str) -> Value {
    json!({ "source": source, "action": action, "producerId": producer_id })
}
