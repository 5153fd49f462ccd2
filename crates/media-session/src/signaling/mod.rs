//! Signaling channel abstraction.
//!
//! The signaling channel is the session's only source of remote truth: a
//! bidirectional RPC/event connection to the SFU server. The session
//! consumes it through the [`SignalingChannel`] trait so the transport
//! (WebSocket hub, WebTransport stream, in-process mock) stays external.
//!
//! # Modules
//!
//! - [`events`] - Inbound server events decoded into [`SignalingEvent`]
//! - [`client`] - [`SfuClient`], typed wrappers over the outbound invocations

pub mod client;
pub mod events;

pub use client::{
    ChangeStreamRequest, ConnectTransportRequest, CreateTransportRequest, ServerErrorPayload,
    SetConsumerLayersRequest, SfuClient, StreamType, TransportOptions, TransportProduceRequest,
};
pub use events::{
    ConsumerRef, ConsumerScoreEvent, LayersChangedEvent, NewConsumerEvent,
    ProducerChangedEvent, SignalingEvent,
};

use crate::errors::SignalingError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Outbound invocation names.
pub mod methods {
    pub const INITIALIZE_CONNECTION: &str = "InitializeConnection";
    pub const CREATE_TRANSPORT: &str = "createTransport";
    pub const CONNECT_TRANSPORT: &str = "connectTransport";
    pub const TRANSPORT_PRODUCE: &str = "transportProduce";
    pub const CHANGE_STREAM: &str = "changeStream";
    pub const SET_CONSUMER_LAYERS: &str = "setConsumerLayers";
}

/// Inbound event names.
pub mod event_names {
    pub const NEW_CONSUMER: &str = "newConsumer";
    pub const CONSUMER_CLOSED: &str = "consumerClosed";
    pub const CONSUMER_PAUSED: &str = "consumerPaused";
    pub const CONSUMER_RESUMED: &str = "consumerResumed";
    pub const CONSUMER_SCORE: &str = "consumerScore";
    pub const LAYERS_CHANGED: &str = "layersChanged";
    pub const PRODUCER_CHANGED: &str = "producerChanged";

    /// Every event the session subscribes to, in subscription order.
    pub const ALL: [&str; 7] = [
        NEW_CONSUMER,
        CONSUMER_CLOSED,
        CONSUMER_SCORE,
        LAYERS_CHANGED,
        CONSUMER_PAUSED,
        CONSUMER_RESUMED,
        PRODUCER_CHANGED,
    ];
}

/// Callback invoked synchronously for every inbound event payload.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle returned by [`SignalingChannel::subscribe`].
///
/// The session keeps every handle it receives and hands each back exactly
/// once on close.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    #[must_use]
    pub fn new(event: impl Into<String>, id: u64) -> Self {
        Self {
            event: event.into(),
            id,
        }
    }

    /// Event name this subscription listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Channel-assigned subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Bidirectional RPC/event channel to the SFU server.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Invoke a server method and wait for its raw result.
    async fn invoke(&self, method: &str, payload: Value) -> Result<Value, SignalingError>;

    /// Register a handler for an inbound event.
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription;

    /// Release a handler registered with [`SignalingChannel::subscribe`].
    fn unsubscribe(&self, subscription: &Subscription);
}
