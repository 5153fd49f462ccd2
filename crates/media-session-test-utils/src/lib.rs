//! # Media Session Test Utilities
//!
//! Shared test utilities for the media session crate.
//!
//! Provides mock implementations of the two external collaborators (the
//! signaling channel and the media engine) so sessions can be tested
//! without a server or a real WebRTC stack.
//!
//! ## Modules
//!
//! - `mock_signaling` - Scriptable signaling channel with event injection
//! - `mock_engine` - Media engine whose transports drive the real handshakes
//! - `fixtures` - Server event payloads
//! - `harness` - Spawned session wired to the mocks, event wait helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use media_session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mut session = TestSession::ready().await;
//!
//!     let id = session
//!         .add_consumer(fixtures::new_video_consumer("c1", "alice"))
//!         .await;
//!
//!     session.handle.request_layer(id, 800).await.unwrap();
//!     assert_eq!(session.signaling.invocation_count("setConsumerLayers"), 1);
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_engine;
pub mod mock_signaling;

pub use harness::{expect_event, TestSession, WAIT_TIMEOUT};
pub use mock_engine::{MockConsumer, MockMediaEngine, MockMediaEngineBuilder, MockTransport};
pub use mock_signaling::{Invocation, MockReply, MockSignaling, MockSignalingBuilder};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_session=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
