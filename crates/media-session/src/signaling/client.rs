//! Typed client for the SFU signaling methods.
//!
//! Every server method answers with the same envelope:
//!
//! ```text
//! { "success": true,  "response": <T> }
//! { "success": false, "error": { "type": "...", "message": "...", "code": "..." } }
//! ```
//!
//! `success = false` becomes [`SignalingError::Server`]; transport-level
//! failures stay [`SignalingError::Disconnected`].

use super::{methods, SignalingChannel};
use crate::engine::DeviceCapabilities;
use crate::errors::SignalingError;
use crate::observability::record_invoke_latency;
use crate::types::{ConsumerId, ConsumerLayers, MediaKind, ProducerId, StreamAction, TransportId};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorPayload {
    #[serde(rename = "type", default)]
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<ServerErrorPayload>,
}

/// Request body of `createTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_capabilities: Option<Value>,
    pub producing: bool,
    pub consuming: bool,
}

/// Server-issued transport options. Everything except the id is opaque
/// to the session and handed to the media engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub id: TransportId,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

/// Request body of `connectTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: Value,
}

/// Request body of `transportProduce`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportProduceRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default)]
    pub app_data: Value,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    id: ProducerId,
}

/// Whether a change-stream request targets a producer or a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Producer,
    Consumer,
}

/// Request body of `changeStream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStreamRequest {
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    pub id: String,
    pub action: StreamAction,
}

/// Request body of `setConsumerLayers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConsumerLayersRequest {
    pub consumer_id: ConsumerId,
    pub layers: ConsumerLayers,
}

/// Typed wrapper over [`SignalingChannel::invoke`].
#[derive(Clone)]
pub struct SfuClient {
    channel: Arc<dyn SignalingChannel>,
}

impl std::fmt::Debug for SfuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfuClient").finish_non_exhaustive()
    }
}

impl SfuClient {
    #[must_use]
    pub fn new(channel: Arc<dyn SignalingChannel>) -> Self {
        Self { channel }
    }

    /// The underlying channel (for event subscription).
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn SignalingChannel> {
        &self.channel
    }

    /// Send local capabilities; returns the server's negotiated parameters
    /// (opaque, `null` when the server sends none).
    pub async fn initialize_connection(
        &self,
        capabilities: &DeviceCapabilities,
    ) -> Result<Value, SignalingError> {
        self.call(methods::INITIALIZE_CONNECTION, capabilities).await
    }

    /// Ask the server for transport parameters.
    pub async fn create_transport(
        &self,
        request: &CreateTransportRequest,
    ) -> Result<TransportOptions, SignalingError> {
        self.call(methods::CREATE_TRANSPORT, request).await
    }

    /// Exchange DTLS parameters for a transport.
    pub async fn connect_transport(
        &self,
        request: &ConnectTransportRequest,
    ) -> Result<(), SignalingError> {
        self.call::<_, Value>(methods::CONNECT_TRANSPORT, request)
            .await
            .map(|_| ())
    }

    /// Forward a local produce request; returns the server-issued producer id.
    pub async fn transport_produce(
        &self,
        request: &TransportProduceRequest,
    ) -> Result<ProducerId, SignalingError> {
        let response: ProduceResponse = self.call(methods::TRANSPORT_PRODUCE, request).await?;
        Ok(response.id)
    }

    /// Pause, resume or close a producer or consumer on the server.
    pub async fn change_stream(&self, request: &ChangeStreamRequest) -> Result<(), SignalingError> {
        self.call::<_, Value>(methods::CHANGE_STREAM, request)
            .await
            .map(|_| ())
    }

    /// Set the preferred simulcast layers of a consumer.
    pub async fn set_consumer_layers(
        &self,
        request: &SetConsumerLayersRequest,
    ) -> Result<(), SignalingError> {
        self.call::<_, Value>(methods::SET_CONSUMER_LAYERS, request)
            .await
            .map(|_| ())
    }

    async fn call<Req, Resp>(&self, method: &'static str, request: &Req) -> Result<Resp, SignalingError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| SignalingError::InvalidRequest(format!("{method}: {e}")))?;

        let started = Instant::now();
        let result = self
            .channel
            .invoke(method, payload)
            .await
            .and_then(|raw| decode_envelope(method, raw));

        let status = if result.is_ok() { "success" } else { "error" };
        record_invoke_latency(method, status, started.elapsed());

        debug!(
            target: "media.session.signaling",
            method = method,
            status = status,
            "Signaling invocation completed"
        );

        result
    }
}

fn decode_envelope<T: DeserializeOwned>(method: &str, raw: Value) -> Result<T, SignalingError> {
    let envelope: Envelope = serde_json::from_value(raw)
        .map_err(|e| SignalingError::InvalidResponse(format!("{method}: {e}")))?;

    if !envelope.success {
        let error = envelope.error.unwrap_or_else(|| ServerErrorPayload {
            error_type: String::new(),
            message: "request failed without error details".to_string(),
            code: String::new(),
        });
        return Err(SignalingError::Server {
            code: error.code,
            message: error.message,
        });
    }

    serde_json::from_value(envelope.response.unwrap_or(Value::Null))
        .map_err(|e| SignalingError::InvalidResponse(format!("{method}: {e}")))
}
