//! Mock media engine for media session testing.
//!
//! Transports behave like a real engine's: the first `consume` or
//! `produce` drives the connect handshake through the session's listener,
//! and `produce` goes through the listener so the server assigns the id.
//!
//! # Example
//!
//! ```rust,ignore
//! use media_session_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::builder()
//!     .can_produce_video(false)
//!     .fail_recv_transport()
//!     .build();
//! ```

use async_trait::async_trait;
use media_session::engine::{
    ConsumeOptions, DeviceCapabilities, MediaConsumer, MediaEngine, MediaTransport,
    ProduceOptions, TransportListener, TransportParameters,
};
use media_session::types::{
    ConnectionState, ConsumerId, MediaKind, ProducerId, TransportDirection, TransportId,
};
use media_session::SessionError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock media engine.
pub struct MockMediaEngine {
    can_produce_audio: bool,
    can_produce_video: bool,
    fail_send: AtomicBool,
    fail_recv: AtomicBool,
    fail_consume: Arc<AtomicBool>,
    consume_delay_ms: Arc<AtomicU64>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    parameters: Mutex<Vec<TransportParameters>>,
}

impl MockMediaEngine {
    /// Engine that can produce audio and video and never fails.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    pub fn set_fail_send_transport(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_recv_transport(&self, fail: bool) {
        self.fail_recv.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_consume(&self, fail: bool) {
        self.fail_consume.store(fail, Ordering::SeqCst);
    }

    /// Delay every `consume` started from now on (use with paused time).
    pub fn set_consume_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.consume_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Transports created for `direction`, oldest first.
    #[must_use]
    pub fn transports(&self, direction: TransportDirection) -> Vec<Arc<MockTransport>> {
        self.transports
            .lock()
            .expect("transports lock poisoned")
            .iter()
            .filter(|t| t.direction == direction)
            .cloned()
            .collect()
    }

    /// Most recently created transport for `direction`.
    #[must_use]
    pub fn transport(&self, direction: TransportDirection) -> Option<Arc<MockTransport>> {
        self.transports(direction).pop()
    }

    #[must_use]
    pub fn transport_count(&self, direction: TransportDirection) -> usize {
        self.transports(direction).len()
    }

    /// Parameters handed to every transport creation, in order.
    #[must_use]
    pub fn parameters(&self) -> Vec<TransportParameters> {
        self.parameters
            .lock()
            .expect("parameters lock poisoned")
            .clone()
    }

    fn build_transport(
        &self,
        direction: TransportDirection,
        parameters: TransportParameters,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn MediaTransport>, SessionError> {
        let failing = match direction {
            TransportDirection::Send => &self.fail_send,
            TransportDirection::Receive => &self.fail_recv,
        };
        if failing.load(Ordering::SeqCst) {
            return Err(SessionError::Engine(format!(
                "mock refused {direction} transport"
            )));
        }

        let transport = Arc::new(MockTransport {
            id: parameters.transport_id().clone(),
            direction,
            listener,
            fail_consume: Arc::clone(&self.fail_consume),
            consume_delay_ms: Arc::clone(&self.consume_delay_ms),
            connected: tokio::sync::Mutex::new(false),
            connect_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        });
        self.parameters
            .lock()
            .expect("parameters lock poisoned")
            .push(parameters);
        self.transports
            .lock()
            .expect("transports lock poisoned")
            .push(Arc::clone(&transport));
        Ok(transport)
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            rtp_capabilities: json!({ "codecs": [], "headerExtensions": [] }),
            sctp_capabilities: Some(json!({ "numStreams": { "OS": 1024, "MIS": 1024 } })),
        }
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.can_produce_audio,
            MediaKind::Video => self.can_produce_video,
        }
    }

    async fn create_send_transport(
        &self,
        parameters: TransportParameters,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn MediaTransport>, SessionError> {
        self.build_transport(TransportDirection::Send, parameters, listener)
    }

    async fn create_recv_transport(
        &self,
        parameters: TransportParameters,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn MediaTransport>, SessionError> {
        self.build_transport(TransportDirection::Receive, parameters, listener)
    }
}

/// Builder for [`MockMediaEngine`].
#[derive(Debug)]
pub struct MockMediaEngineBuilder {
    can_produce_audio: bool,
    can_produce_video: bool,
    fail_send: bool,
    fail_recv: bool,
    fail_consume: bool,
}

impl Default for MockMediaEngineBuilder {
    fn default() -> Self {
        Self {
            can_produce_audio: true,
            can_produce_video: true,
            fail_send: false,
            fail_recv: false,
            fail_consume: false,
        }
    }
}

impl MockMediaEngineBuilder {
    #[must_use]
    pub fn can_produce_audio(mut self, can: bool) -> Self {
        self.can_produce_audio = can;
        self
    }

    #[must_use]
    pub fn can_produce_video(mut self, can: bool) -> Self {
        self.can_produce_video = can;
        self
    }

    /// Receive-only device.
    #[must_use]
    pub fn receive_only(self) -> Self {
        self.can_produce_audio(false).can_produce_video(false)
    }

    #[must_use]
    pub fn fail_send_transport(mut self) -> Self {
        self.fail_send = true;
        self
    }

    #[must_use]
    pub fn fail_recv_transport(mut self) -> Self {
        self.fail_recv = true;
        self
    }

    #[must_use]
    pub fn fail_consume(mut self) -> Self {
        self.fail_consume = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockMediaEngine> {
        Arc::new(MockMediaEngine {
            can_produce_audio: self.can_produce_audio,
            can_produce_video: self.can_produce_video,
            fail_send: AtomicBool::new(self.fail_send),
            fail_recv: AtomicBool::new(self.fail_recv),
            fail_consume: Arc::new(AtomicBool::new(self.fail_consume)),
            consume_delay_ms: Arc::new(AtomicU64::new(0)),
            transports: Mutex::new(Vec::new()),
            parameters: Mutex::new(Vec::new()),
        })
    }
}

/// Mock transport created by [`MockMediaEngine`].
pub struct MockTransport {
    id: TransportId,
    direction: TransportDirection,
    listener: Arc<dyn TransportListener>,
    fail_consume: Arc<AtomicBool>,
    consume_delay_ms: Arc<AtomicU64>,
    connected: tokio::sync::Mutex<bool>,
    connect_calls: AtomicUsize,
    closed: AtomicBool,
    consumers: Mutex<Vec<Arc<MockConsumer>>>,
}

impl MockTransport {
    /// Consumers created on this transport, oldest first.
    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers
            .lock()
            .expect("consumers lock poisoned")
            .clone()
    }

    /// Consumer with `id`, if this transport created one.
    #[must_use]
    pub fn consumer(&self, id: &str) -> Option<Arc<MockConsumer>> {
        self.consumers()
            .into_iter()
            .find(|c| c.id.as_str() == id)
    }

    /// Number of connect handshakes attempted.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Report a connection-state change as the engine would.
    pub fn simulate_state(&self, state: ConnectionState) {
        self.listener.connection_state_changed(state);
    }

    /// Close the transport from the engine side and report it.
    pub fn simulate_close(&self) {
        self.close();
        self.listener.connection_state_changed(ConnectionState::Closed);
    }

    async fn ensure_connected(&self) -> Result<(), SessionError> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.listener
            .connect(json!({ "role": "client", "fingerprints": [] }))
            .await?;
        *connected = true;
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    async fn consume(
        &self,
        options: ConsumeOptions,
    ) -> Result<Arc<dyn MediaConsumer>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Engine("transport closed".to_string()));
        }
        if self.direction != TransportDirection::Receive {
            return Err(SessionError::Engine(
                "cannot consume on a send transport".to_string(),
            ));
        }
        if self.fail_consume.load(Ordering::SeqCst) {
            return Err(SessionError::Engine("mock refused consume".to_string()));
        }
        let delay = self.consume_delay_ms.load(Ordering::SeqCst);
        self.ensure_connected().await?;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let consumer = Arc::new(MockConsumer::new(
            options.id,
            options.producer_id,
            options.kind,
            options.app_data,
        ));
        self.consumers
            .lock()
            .expect("consumers lock poisoned")
            .push(Arc::clone(&consumer));
        Ok(consumer)
    }

    async fn produce(&self, options: ProduceOptions) -> Result<ProducerId, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Engine("transport closed".to_string()));
        }
        if self.direction != TransportDirection::Send {
            return Err(SessionError::Engine(
                "cannot produce on a receive transport".to_string(),
            ));
        }
        self.ensure_connected().await?;
        self.listener
            .produce(
                options.kind,
                json!({ "codecs": [], "encodings": [] }),
                options.app_data,
            )
            .await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for consumer in self.consumers() {
            consumer.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock consumer created by [`MockTransport::consume`].
#[derive(Debug)]
pub struct MockConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    app_data: Value,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl MockConsumer {
    #[must_use]
    pub fn new(id: ConsumerId, producer_id: ProducerId, kind: MediaKind, app_data: Value) -> Self {
        Self {
            id,
            producer_id,
            kind,
            app_data,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl MediaConsumer for MockConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn app_data(&self) -> &Value {
        &self.app_data
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_session::signaling::TransportOptions;
    use media_session::types::ProducerSource;
    use serde_json::Map;

    #[derive(Default)]
    struct RecordingListener {
        connects: AtomicUsize,
        states: Mutex<Vec<ConnectionState>>,
    }

    #[async_trait]
    impl TransportListener for RecordingListener {
        async fn connect(&self, _dtls_parameters: Value) -> Result<(), SessionError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn produce(
            &self,
            _kind: MediaKind,
            _rtp_parameters: Value,
            _app_data: Value,
        ) -> Result<ProducerId, SessionError> {
            Ok(ProducerId::new("p1"))
        }

        fn connection_state_changed(&self, state: ConnectionState) {
            self.states.lock().unwrap().push(state);
        }
    }

    fn parameters(id: &str) -> TransportParameters {
        TransportParameters::for_receive(TransportOptions {
            id: TransportId::new(id),
            parameters: Map::new(),
        })
    }

    #[tokio::test]
    async fn test_connect_runs_once_across_operations() {
        let engine = MockMediaEngine::new();
        let listener = Arc::new(RecordingListener::default());
        let transport = engine
            .create_send_transport(parameters("t1"), listener.clone())
            .await
            .unwrap();

        for _ in 0..2 {
            let id = transport
                .produce(ProduceOptions::new(MediaKind::Audio, ProducerSource::Mic))
                .await
                .unwrap();
            assert_eq!(id, ProducerId::new("p1"));
        }
        assert_eq!(listener.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receive_transport_cannot_produce() {
        let engine = MockMediaEngine::new();
        let transport = engine
            .create_recv_transport(parameters("t1"), Arc::new(RecordingListener::default()))
            .await
            .unwrap();

        let result = transport
            .produce(ProduceOptions::new(MediaKind::Video, ProducerSource::Webcam))
            .await;
        assert!(matches!(result, Err(SessionError::Engine(_))));
    }

    #[tokio::test]
    async fn test_simulate_close_reports_and_closes_consumers() {
        let engine = MockMediaEngine::new();
        let listener = Arc::new(RecordingListener::default());
        engine
            .create_recv_transport(parameters("t1"), listener.clone())
            .await
            .unwrap();
        let transport = engine.transport(TransportDirection::Receive).unwrap();
        transport
            .consume(ConsumeOptions {
                id: ConsumerId::new("c1"),
                producer_id: ProducerId::new("p1"),
                kind: MediaKind::Video,
                rtp_parameters: json!({}),
                app_data: json!({}),
            })
            .await
            .unwrap();

        transport.simulate_close();

        assert!(transport.is_closed());
        assert!(transport.consumer("c1").unwrap().is_closed());
        assert_eq!(*listener.states.lock().unwrap(), vec![ConnectionState::Closed]);
    }

    #[tokio::test]
    async fn test_builder_failures() {
        let engine = MockMediaEngine::builder()
            .receive_only()
            .fail_send_transport()
            .build();
        assert!(!engine.can_produce(MediaKind::Audio));

        let result = engine
            .create_send_transport(parameters("t1"), Arc::new(RecordingListener::default()))
            .await;
        assert!(result.is_err());
        assert_eq!(engine.transport_count(TransportDirection::Send), 0);
    }
}
