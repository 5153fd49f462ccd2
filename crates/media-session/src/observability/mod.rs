//! Observability for the media session.
//!
//! Logging uses `tracing` with per-component targets:
//!
//! | Target | Component |
//! |--------|-----------|
//! | `media.session` | orchestrator actor |
//! | `media.session.transport` | transport creation and handshakes |
//! | `media.session.consumers` | consumer registry |
//! | `media.session.layers` | layer controller |
//! | `media.session.signaling` | signaling client and event decoding |
//!
//! Consumer, producer and transport ids are logged as fields; payloads
//! (RTP/DTLS parameters) are never logged.

pub mod metrics;

pub use metrics::{
    record_event_dropped, record_invoke_latency, record_layer_request, record_operation_error,
    record_signaling_event, record_transport_state, record_unknown_entity_event,
    set_consumers_active, LayerRequestOutcome,
};
