//! Message types for the session actor.
//!
//! Three kinds of message share one mailbox so they are processed in a
//! single order:
//!
//! - requests from a [`super::SessionHandle`], answered over `respond_to`
//! - inbound signaling events and transport state changes
//! - continuations posted by spawned network tasks

use crate::consumers::{ConsumerSnapshot, ConsumerStatusInfo};
use crate::engine::{MediaConsumer, MediaTransport, ProduceOptions};
use crate::errors::{SessionError, SignalingError};
use crate::producers::ProducerState;
use crate::signaling::{ChangeStreamRequest, SignalingEvent};
use crate::types::{
    ConnectionState, ConsumerId, ConsumerLayers, ParticipantId, ProducerId, ProducerSource,
    TransportDirection, TransportId,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lifecycle of a session. Moves forward only; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        }
    }
}

/// Local production capabilities, returned by a successful initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub can_produce_audio: bool,
    pub can_produce_video: bool,
}

impl InitializeResult {
    #[must_use]
    pub const fn can_produce(&self) -> bool {
        self.can_produce_audio || self.can_produce_video
    }
}

/// Messages processed by the session actor.
pub enum SessionMessage {
    // --- Handle requests ---
    /// Run the initialization protocol.
    Initialize {
        respond_to: oneshot::Sender<Result<InitializeResult, SessionError>>,
    },

    /// Close the session (idempotent).
    Close { respond_to: oneshot::Sender<()> },

    GetConsumers {
        respond_to: oneshot::Sender<Vec<ConsumerSnapshot>>,
    },

    GetConsumer {
        consumer_id: ConsumerId,
        respond_to: oneshot::Sender<Option<ConsumerSnapshot>>,
    },

    GetConsumerInfo {
        consumer_id: ConsumerId,
        respond_to: oneshot::Sender<Option<ConsumerStatusInfo>>,
    },

    GetProducerState {
        source: ProducerSource,
        respond_to: oneshot::Sender<Option<ProducerState>>,
    },

    /// Pick a spatial layer for a rendered width and request it.
    RequestLayer {
        consumer_id: ConsumerId,
        width: u32,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Request explicit layers for a consumer.
    SetConsumerLayers {
        consumer_id: ConsumerId,
        layers: ConsumerLayers,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    ChangeStream {
        request: ChangeStreamRequest,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    Produce {
        options: ProduceOptions,
        respond_to: oneshot::Sender<Result<ProducerId, SessionError>>,
    },

    /// Create the transport for one direction (caller retry path).
    CreateTransport {
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportId, SessionError>>,
    },

    GetTransportState {
        direction: TransportDirection,
        respond_to: oneshot::Sender<Option<ConnectionState>>,
    },

    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },

    GetCapabilities {
        respond_to: oneshot::Sender<Option<InitializeResult>>,
    },

    // --- Inbound ---
    /// Decoded server event.
    Signaling(SignalingEvent),

    /// Connection-state change reported by a transport listener.
    TransportStateChanged {
        transport_id: TransportId,
        direction: TransportDirection,
        state: ConnectionState,
    },

    // --- Continuations ---
    /// The `InitializeConnection` round-trip finished.
    InitializeCompleted {
        capabilities: InitializeResult,
        result: Result<Value, SignalingError>,
        respond_to: oneshot::Sender<Result<InitializeResult, SessionError>>,
    },

    /// A transport creation attempt finished; install it or report failure.
    InstallTransport {
        direction: TransportDirection,
        result: Result<Arc<dyn MediaTransport>, SessionError>,
        respond_to: oneshot::Sender<Result<TransportId, SessionError>>,
    },

    /// `consume` on the receive transport finished.
    ConsumerCreated {
        /// Per-session `consume` attempt number.
        attempt: u64,
        consumer_id: ConsumerId,
        participant_id: ParticipantId,
        transport_id: TransportId,
        producer_paused: bool,
        result: Result<Arc<dyn MediaConsumer>, SessionError>,
    },

    /// `setConsumerLayers` round-trip finished.
    LayerRequestCompleted {
        consumer_id: ConsumerId,
        layers: ConsumerLayers,
        result: Result<(), SignalingError>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}

impl SessionMessage {
    /// Message name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SessionMessage::Initialize { .. } => "initialize",
            SessionMessage::Close { .. } => "close",
            SessionMessage::GetConsumers { .. } => "get_consumers",
            SessionMessage::GetConsumer { .. } => "get_consumer",
            SessionMessage::GetConsumerInfo { .. } => "get_consumer_info",
            SessionMessage::GetProducerState { .. } => "get_producer_state",
            SessionMessage::RequestLayer { .. } => "request_layer",
            SessionMessage::SetConsumerLayers { .. } => "set_consumer_layers",
            SessionMessage::ChangeStream { .. } => "change_stream",
            SessionMessage::Produce { .. } => "produce",
            SessionMessage::CreateTransport { .. } => "create_transport",
            SessionMessage::GetTransportState { .. } => "get_transport_state",
            SessionMessage::GetState { .. } => "get_state",
            SessionMessage::GetCapabilities { .. } => "get_capabilities",
            SessionMessage::Signaling(_) => "signaling",
            SessionMessage::TransportStateChanged { .. } => "transport_state_changed",
            SessionMessage::InitializeCompleted { .. } => "initialize_completed",
            SessionMessage::InstallTransport { .. } => "install_transport",
            SessionMessage::ConsumerCreated { .. } => "consumer_created",
            SessionMessage::LayerRequestCompleted { .. } => "layer_request_completed",
        }
    }
}

impl std::fmt::Debug for SessionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionMessage").field(&self.name()).finish()
    }
}
