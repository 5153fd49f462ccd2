//! Common data types for the media session.
//!
//! Identifiers are opaque strings issued by the SFU. They are wrapped in
//! newtypes so a consumer id can never be passed where a producer id is
//! expected; on the wire they serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from anything string-like.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an inbound consumer.
    ConsumerId
);
string_id!(
    /// Identifier of a server-side producer.
    ProducerId
);
string_id!(
    /// Identifier of a send or receive transport.
    TransportId
);
string_id!(
    /// Identifier of a conference participant.
    ParticipantId
);

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Direction of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Receive,
}

impl TransportDirection {
    /// Returns the direction as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Receive => "receive",
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    /// A transport in a terminal state can never carry media again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Simulcast layers of a video consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    pub spatial_layer: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

impl ConsumerLayers {
    #[must_use]
    pub const fn spatial(spatial_layer: u8) -> Self {
        Self {
            spatial_layer,
            temporal_layer: None,
        }
    }
}

/// Quality score reported by the SFU for a consumer (0-10).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    pub score: u8,
    pub producer_score: u8,
    #[serde(default)]
    pub producer_scores: Vec<u8>,
}

/// Source of an outbound producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerSource {
    Mic,
    Webcam,
    Screen,
}

impl ProducerSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProducerSource::Mic => "mic",
            ProducerSource::Webcam => "webcam",
            ProducerSource::Screen => "screen",
        }
    }
}

/// Action applied to a producer or consumer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Pause,
    Resume,
    Close,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = ConsumerId::new("consumer-1");
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("consumer-1"));
        assert_eq!(id.to_string(), "consumer-1");
    }

    #[test]
    fn test_layers_wire_format() {
        let layers: ConsumerLayers =
            serde_json::from_value(json!({ "spatialLayer": 2 })).unwrap();
        assert_eq!(layers, ConsumerLayers::spatial(2));

        let with_temporal = ConsumerLayers {
            spatial_layer: 1,
            temporal_layer: Some(0),
        };
        assert_eq!(
            serde_json::to_value(with_temporal).unwrap(),
            json!({ "spatialLayer": 1, "temporalLayer": 0 })
        );
    }

    #[test]
    fn test_terminal_connection_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::New.is_terminal());
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_value(MediaKind::Video).unwrap(), json!("video"));
        assert_eq!(
            serde_json::to_value(ProducerSource::Webcam).unwrap(),
            json!("webcam")
        );
        assert_eq!(
            serde_json::from_value::<StreamAction>(json!("close")).unwrap(),
            StreamAction::Close
        );
    }
}
