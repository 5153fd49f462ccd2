//! Media session error types.
//!
//! Every network-facing operation returns one of these to its caller. Nothing
//! here is retried inside the crate; `is_retryable` lets callers decide.
//! Events that reference an unknown consumer are not errors and never appear
//! here (they are logged and counted instead).

use crate::types::{ConsumerId, TransportDirection, TransportId};
use thiserror::Error;

/// Errors talking to the signaling peer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    /// The signaling connection is gone.
    #[error("Signaling channel disconnected: {0}")]
    Disconnected(String),

    /// The request payload could not be encoded.
    #[error("Invalid signaling request: {0}")]
    InvalidRequest(String),

    /// The peer answered with something we could not decode.
    #[error("Invalid signaling response: {0}")]
    InvalidResponse(String),

    /// The peer processed the request and rejected it.
    #[error("Server error ({code}): {message}")]
    Server { code: String, message: String },
}

/// Media session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Capability negotiation rejected; terminal for this session instance.
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// `initialize()` called on a session that already left `uninitialized`.
    #[error("Session already initialized")]
    AlreadyInitialized,

    /// Operation on a closed session.
    #[error("Session is closed")]
    SessionClosed,

    /// Operation requires a `ready` session.
    #[error("Session is not ready")]
    NotReady,

    /// Creating the transport for one direction failed.
    #[error("Failed to create {direction} transport: {reason}")]
    TransportCreation {
        direction: TransportDirection,
        reason: String,
    },

    /// Security handshake for a transport was rejected.
    #[error("Failed to connect transport {transport_id}: {reason}")]
    TransportConnect {
        transport_id: TransportId,
        reason: String,
    },

    /// A live transport already exists for this direction.
    #[error("A {0} transport already exists")]
    TransportExists(TransportDirection),

    /// No usable transport for this direction.
    #[error("No usable {0} transport")]
    TransportUnavailable(TransportDirection),

    /// The server rejected a produce request.
    #[error("Produce failed: {0}")]
    Produce(String),

    /// The server rejected a preferred-layer change.
    #[error("Failed to set layers for consumer {consumer_id}: {reason}")]
    LayerChange {
        consumer_id: ConsumerId,
        reason: String,
    },

    /// The server rejected a change-stream request.
    #[error("Change stream failed: {0}")]
    ChangeStream(String),

    /// The media engine refused an operation.
    #[error("Media engine error: {0}")]
    Engine(String),

    /// Internal error with context (actor mailbox gone, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether a caller may reasonably retry the same operation.
    ///
    /// Terminal session states and local misuse are not retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::TransportCreation { .. }
            | SessionError::TransportConnect { .. }
            | SessionError::Produce(_)
            | SessionError::LayerChange { .. }
            | SessionError::ChangeStream(_) => true,
            SessionError::InitializationFailed(_)
            | SessionError::AlreadyInitialized
            | SessionError::SessionClosed
            | SessionError::NotReady
            | SessionError::TransportExists(_)
            | SessionError::TransportUnavailable(_)
            | SessionError::Engine(_)
            | SessionError::Internal(_) => false,
        }
    }

    /// Label for the `error_type` dimension of `media_session_errors_total`.
    #[must_use]
    pub const fn error_type_label(&self) -> &'static str {
        match self {
            SessionError::InitializationFailed(_) => "initialization_failed",
            SessionError::AlreadyInitialized => "already_initialized",
            SessionError::SessionClosed => "session_closed",
            SessionError::NotReady => "not_ready",
            SessionError::TransportCreation { .. } => "transport_creation",
            SessionError::TransportConnect { .. } => "transport_connect",
            SessionError::TransportExists(_) => "transport_exists",
            SessionError::TransportUnavailable(_) => "transport_unavailable",
            SessionError::Produce(_) => "produce",
            SessionError::LayerChange { .. } => "layer_change",
            SessionError::ChangeStream(_) => "change_stream",
            SessionError::Engine(_) => "engine",
            SessionError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                SessionError::TransportCreation {
                    direction: TransportDirection::Send,
                    reason: "no capacity".to_string(),
                }
            ),
            "Failed to create send transport: no capacity"
        );

        assert_eq!(
            format!(
                "{}",
                SignalingError::Server {
                    code: "NotFound".to_string(),
                    message: "consumer not found".to_string(),
                }
            ),
            "Server error (NotFound): consumer not found"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SessionError::LayerChange {
            consumer_id: ConsumerId::new("c1"),
            reason: "timeout".to_string(),
        }
        .is_retryable());
        assert!(SessionError::TransportCreation {
            direction: TransportDirection::Receive,
            reason: "busy".to_string(),
        }
        .is_retryable());
        assert!(SessionError::Produce("producer limit".to_string()).is_retryable());

        assert!(!SessionError::InitializationFailed("rejected".to_string()).is_retryable());
        assert!(!SessionError::SessionClosed.is_retryable());
        assert!(!SessionError::AlreadyInitialized.is_retryable());
        assert!(!SessionError::TransportExists(TransportDirection::Send).is_retryable());
    }

    #[test]
    fn test_error_type_labels() {
        assert_eq!(
            SessionError::InitializationFailed("rejected".to_string()).error_type_label(),
            "initialization_failed"
        );
        assert_eq!(
            SessionError::TransportConnect {
                transport_id: TransportId::new("t1"),
                reason: "dtls".to_string(),
            }
            .error_type_label(),
            "transport_connect"
        );
        assert_eq!(
            SessionError::LayerChange {
                consumer_id: ConsumerId::new("c1"),
                reason: "timeout".to_string(),
            }
            .error_type_label(),
            "layer_change"
        );
        assert_eq!(SessionError::NotReady.error_type_label(), "not_ready");
    }
}
