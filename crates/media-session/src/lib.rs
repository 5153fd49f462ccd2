//! Media Session Library
//!
//! Client-side state machine for a Selective Forwarding Unit (SFU)
//! connection:
//!
//! - Capability negotiation and send/receive transport lifecycle
//! - Inbound consumer registry driven by server events
//! - Server-reported producer pause/resume/close tracking
//! - Simulcast layer selection from rendered tile width
//! - Change notifications for the UI/business layer
//!
//! The signaling channel and the media engine are external collaborators,
//! consumed through the [`signaling::SignalingChannel`] and
//! [`engine::MediaEngine`] traits.
//!
//! # Architecture
//!
//! ```text
//! SessionOrchestrator (actor, one per conference join)
//! ├── TransportManager        send + receive slots, connect/produce handshakes
//! ├── ConsumerRegistry        consumers + status info (score, layers)
//! ├── ProducerLifecycleTracker
//! ├── LayerController         width -> spatial layer, suppression cache
//! └── SessionEventBus         broadcast to UI subscribers
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: all session state lives in one actor task; no locks
//! - **Unknown ids are no-ops**: remote events racing local teardown are
//!   logged and counted, never raised
//! - **No internal retries**: every network failure is returned to the
//!   caller
//! - **Explicit handle**: callers hold a [`SessionHandle`], no global session
//!
//! # Modules
//!
//! - [`actors`] - Session actor, handle and mailbox monitoring
//! - [`config`] - Configuration from environment
//! - [`consumers`] - Consumer registry
//! - [`engine`] - Media engine boundary traits
//! - [`errors`] - Error types
//! - [`events`] - Session event bus
//! - [`layers`] - Simulcast layer selection
//! - [`observability`] - Tracing targets and metrics
//! - [`producers`] - Producer lifecycle tracking
//! - [`signaling`] - Signaling channel abstraction and typed client
//! - [`transport`] - Transport manager and handshakes
//! - [`types`] - Identifiers and wire enums

pub mod actors;
pub mod config;
pub mod consumers;
pub mod engine;
pub mod errors;
pub mod events;
pub mod layers;
pub mod observability;
pub mod producers;
pub mod signaling;
pub mod transport;
pub mod types;

pub use actors::{InitializeResult, SessionHandle, SessionOrchestrator, SessionState};
pub use config::SessionConfig;
pub use errors::{SessionError, SignalingError};
pub use events::{SessionEvent, SessionEventBus};
