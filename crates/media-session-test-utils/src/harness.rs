//! Session harness: a spawned session wired to the mocks.

use crate::mock_engine::MockMediaEngine;
use crate::mock_signaling::MockSignaling;

use media_session::types::ConsumerId;
use media_session::{SessionConfig, SessionEvent, SessionHandle, SessionOrchestrator};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long helpers wait for the actor before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running session plus the mocks behind it.
pub struct TestSession {
    pub handle: SessionHandle,
    pub task: JoinHandle<()>,
    pub signaling: Arc<MockSignaling>,
    pub engine: Arc<MockMediaEngine>,
    pub events: broadcast::Receiver<SessionEvent>,
    pub cancel_token: CancellationToken,
}

impl TestSession {
    /// Spawn a session with default config and accept-everything mocks.
    #[must_use]
    pub fn start() -> Self {
        Self::with_mocks(MockSignaling::new(), MockMediaEngine::new())
    }

    /// Spawn a session over the given mocks.
    #[must_use]
    pub fn with_mocks(signaling: Arc<MockSignaling>, engine: Arc<MockMediaEngine>) -> Self {
        Self::with_config(SessionConfig::default(), signaling, engine)
    }

    #[must_use]
    pub fn with_config(
        config: SessionConfig,
        signaling: Arc<MockSignaling>,
        engine: Arc<MockMediaEngine>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let (handle, task) = SessionOrchestrator::spawn(
            config,
            signaling.clone(),
            engine.clone(),
            cancel_token.clone(),
        );
        let events = handle.subscribe();
        Self {
            handle,
            task,
            signaling,
            engine,
            events,
            cancel_token,
        }
    }

    /// Spawn and initialize; panics if initialization fails.
    pub async fn ready() -> Self {
        let session = Self::start();
        session
            .handle
            .initialize()
            .await
            .expect("initialize should succeed");
        session
    }

    /// Push a server event into the session.
    pub fn emit(&self, event: &str, payload: Value) {
        self.signaling.emit(event, payload);
    }

    /// Push a `newConsumer` event and wait until the consumer is registered.
    pub async fn add_consumer(&mut self, payload: Value) -> ConsumerId {
        let id = ConsumerId::new(
            payload["id"]
                .as_str()
                .expect("newConsumer payload must carry an id"),
        );
        self.emit("newConsumer", payload);
        self.wait_for_consumer(&id).await;
        id
    }

    /// Wait until `id` shows up in the registry.
    pub async fn wait_for_consumer(&self, id: &ConsumerId) {
        let handle = self.handle.clone();
        let id = id.clone();
        tokio::time::timeout(WAIT_TIMEOUT, async move {
            loop {
                if handle
                    .get_consumer(id.clone())
                    .await
                    .expect("session stopped")
                    .is_some()
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for consumer");
    }

    /// Receive events until one matches; panics on timeout.
    pub async fn expect_event(
        &mut self,
        predicate: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        expect_event(&mut self.events, predicate).await
    }

    /// Events already delivered, without waiting.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Cancel the actor and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        tokio::time::timeout(WAIT_TIMEOUT, self.task)
            .await
            .expect("actor did not stop")
            .expect("actor panicked");
    }
}

/// Receive events until one matches; panics on timeout.
pub async fn expect_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event bus closed while waiting")
                }
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}
