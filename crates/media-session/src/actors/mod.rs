//! Session actor.
//!
//! The media session runs as a single actor so that signaling events,
//! handle requests and network completions are applied to session state
//! one at a time, in mailbox order:
//!
//! ```text
//! SignalingChannel --(try_send)--> +-------------------------+
//!                                  |  SessionOrchestrator    |
//! SessionHandle ----(send)-------> |  transports / consumers | --> SessionEventBus
//!                                  |  producers / layers     |
//! spawned tasks --(continuation)-> +-------------------------+
//! ```
//!
//! # Modules
//!
//! - [`orchestrator`] - [`SessionOrchestrator`] and its [`SessionHandle`]
//! - [`messages`] - Mailbox message types and session lifecycle state
//! - [`metrics`] - Mailbox depth monitoring

pub mod messages;
pub mod metrics;
pub mod orchestrator;

pub use messages::{InitializeResult, SessionMessage, SessionState};
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use orchestrator::{SessionHandle, SessionOrchestrator};

pub(crate) use orchestrator::MailboxNotifier;
