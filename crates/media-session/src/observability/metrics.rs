//! Metrics definitions for the media session.
//!
//! All metrics follow Prometheus naming conventions:
//! - `media_session_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: 7 signaling event names
//! - `method`: 6 signaling invocation names
//! - `outcome`: bounded by [`LayerRequestOutcome`]
//! - `direction` x `state`: 2 x 5
//! - `operation` x `error_type`: bounded by the handle's operations and
//!   `SessionError::error_type_label`
//!
//! Consumer and participant ids are never used as labels.
//!
//! Only the `metrics` facade is used here; installing a recorder/exporter is
//! the embedding application's job.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Outcome of a layer request, used as the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRequestOutcome {
    /// Sent to the server and accepted.
    Sent,
    /// Same layers as the cached preference; no network call.
    Suppressed,
    /// Sent and rejected (or the channel failed).
    Failed,
    /// Consumer not in the registry.
    UnknownConsumer,
}

impl LayerRequestOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LayerRequestOutcome::Sent => "sent",
            LayerRequestOutcome::Suppressed => "suppressed",
            LayerRequestOutcome::Failed => "failed",
            LayerRequestOutcome::UnknownConsumer => "unknown_consumer",
        }
    }
}

/// Record an inbound signaling event.
///
/// Metric: `media_session_signaling_events_total`
/// Labels: `event`
pub fn record_signaling_event(event: &'static str) {
    counter!("media_session_signaling_events_total", "event" => event).increment(1);
}

/// Record an event that referenced a consumer we do not have.
///
/// Metric: `media_session_unknown_entity_events_total`
/// Labels: `event`
///
/// Expected during teardown races; a steady non-zero rate outside of
/// leave/rejoin points at a server ordering problem.
pub fn record_unknown_entity_event(event: &'static str) {
    counter!("media_session_unknown_entity_events_total", "event" => event).increment(1);
}

/// Record an inbound event dropped before processing.
///
/// Metric: `media_session_events_dropped_total`
/// Labels: `reason` (`malformed`, `mailbox_full`, `no_receive_transport`)
pub fn record_event_dropped(reason: &'static str) {
    counter!("media_session_events_dropped_total", "reason" => reason).increment(1);
}

/// Set the number of consumers in the registry.
///
/// Metric: `media_session_consumers_active`
pub fn set_consumers_active(count: usize) {
    // usize to f64 conversion is safe for realistic consumer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("media_session_consumers_active").set(count as f64);
}

/// Record a layer request outcome.
///
/// Metric: `media_session_layer_requests_total`
/// Labels: `outcome`
pub fn record_layer_request(outcome: LayerRequestOutcome) {
    counter!("media_session_layer_requests_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record signaling invocation latency.
///
/// Metric: `media_session_signaling_invoke_seconds`
/// Labels: `method`, `status` (`success`, `error`)
pub fn record_invoke_latency(method: &str, status: &'static str, duration: Duration) {
    histogram!(
        "media_session_signaling_invoke_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record an operation that returned an error to its caller.
///
/// Metric: `media_session_errors_total`
/// Labels: `operation`, `error_type`
pub fn record_operation_error(operation: &'static str, error_type: &'static str) {
    counter!(
        "media_session_errors_total",
        "operation" => operation,
        "error_type" => error_type
    )
    .increment(1);
}

/// Record a transport connection-state transition.
///
/// Metric: `media_session_transport_state_changes_total`
/// Labels: `direction`, `state`
pub fn record_transport_state(direction: &'static str, state: &'static str) {
    counter!(
        "media_session_transport_state_changes_total",
        "direction" => direction,
        "state" => state
    )
    .increment(1);
}
