//! Media engine boundary.
//!
//! The media engine does the actual ICE/DTLS/SRTP work and codec
//! negotiation. The session only sees it through these traits: it asks for
//! capabilities, hands it server-issued transport options, and gets back
//! transports and consumers it can pause, resume and close.
//!
//! A transport calls back into the session through its
//! [`TransportListener`] for the two handshake steps that need the signaling
//! peer (connect and produce) and for connection-state changes.

use crate::errors::SessionError;
use crate::signaling::TransportOptions;
use crate::types::{
    ConnectionState, ConsumerId, MediaKind, ProducerId, ProducerSource, TransportDirection,
    TransportId,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Local capability documents, sent to the server during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub rtp_capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_capabilities: Option<Value>,
}

/// Options handed to the engine when building a local transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportParameters {
    /// Server-issued options, passed through untouched.
    pub options: TransportOptions,
    /// ICE servers; `Some(vec![])` disables external STUN/TURN.
    pub ice_servers: Option<Vec<Value>>,
    /// Proprietary peer-connection constraints.
    pub proprietary_constraints: Option<Value>,
}

impl TransportParameters {
    /// Parameters for a send transport: no external ICE servers and DSCP
    /// marking enabled.
    #[must_use]
    pub fn for_send(options: TransportOptions) -> Self {
        Self {
            options,
            ice_servers: Some(Vec::new()),
            proprietary_constraints: Some(json!({ "optional": [{ "googDscp": true }] })),
        }
    }

    /// Parameters for a receive transport: server options only.
    #[must_use]
    pub fn for_receive(options: TransportOptions) -> Self {
        Self {
            options,
            ice_servers: None,
            proprietary_constraints: None,
        }
    }

    #[must_use]
    pub fn transport_id(&self) -> &TransportId {
        &self.options.id
    }
}

/// Options for consuming a remote producer on the receive transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

/// Options for publishing a local track on the send transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceOptions {
    pub kind: MediaKind,
    pub source: ProducerSource,
    /// Engine-specific handle of the local track.
    pub track: Value,
    pub app_data: Value,
}

impl ProduceOptions {
    #[must_use]
    pub fn new(kind: MediaKind, source: ProducerSource) -> Self {
        Self {
            kind,
            source,
            track: Value::Null,
            app_data: json!({ "source": source.as_str() }),
        }
    }
}

/// Handshake surface a transport calls back into.
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Exchange DTLS parameters with the signaling peer. Called by the engine
    /// on first use of the transport.
    async fn connect(&self, dtls_parameters: Value) -> Result<(), SessionError>;

    /// Forward a local produce request; resolves with the server-issued id.
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> Result<ProducerId, SessionError>;

    /// Report a connection-state change observed by the engine.
    fn connection_state_changed(&self, state: ConnectionState);
}

/// A local send or receive transport.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &TransportId;

    fn direction(&self) -> TransportDirection;

    /// Create a consumer for a remote producer (receive transports only).
    async fn consume(&self, options: ConsumeOptions)
        -> Result<Arc<dyn MediaConsumer>, SessionError>;

    /// Publish a local track (send transports only).
    async fn produce(&self, options: ProduceOptions) -> Result<ProducerId, SessionError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Local handle on one inbound track.
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> &ConsumerId;

    fn producer_id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn app_data(&self) -> &Value;

    fn pause(&self);

    fn resume(&self);

    fn close(&self);

    fn is_paused(&self) -> bool;

    fn is_closed(&self) -> bool;
}

/// Capability-reporting, transport-creating media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;

    fn can_produce(&self, kind: MediaKind) -> bool;

    async fn create_send_transport(
        &self,
        parameters: TransportParameters,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn MediaTransport>, SessionError>;

    async fn create_recv_transport(
        &self,
        parameters: TransportParameters,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn MediaTransport>, SessionError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn options(id: &str) -> TransportOptions {
        TransportOptions {
            id: TransportId::new(id),
            parameters: Map::new(),
        }
    }

    #[test]
    fn test_send_parameters_disable_ice_servers_and_enable_dscp() {
        let params = TransportParameters::for_send(options("t1"));
        assert_eq!(params.ice_servers, Some(Vec::new()));
        assert_eq!(
            params.proprietary_constraints,
            Some(json!({ "optional": [{ "googDscp": true }] }))
        );
        assert_eq!(params.transport_id(), &TransportId::new("t1"));
    }

    #[test]
    fn test_receive_parameters_pass_options_through() {
        let params = TransportParameters::for_receive(options("t2"));
        assert!(params.ice_servers.is_none());
        assert!(params.proprietary_constraints.is_none());
    }

    #[test]
    fn test_capabilities_wire_format() {
        let caps = DeviceCapabilities {
            rtp_capabilities: json!({ "codecs": [] }),
            sctp_capabilities: None,
        };
        assert_eq!(
            serde_json::to_value(&caps).unwrap(),
            json!({ "rtpCapabilities": { "codecs": [] } })
        );
    }

    #[test]
    fn test_produce_options_tag_source() {
        let options = ProduceOptions::new(MediaKind::Video, ProducerSource::Screen);
        assert_eq!(options.app_data, json!({ "source": "screen" }));
    }
}
