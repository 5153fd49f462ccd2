//! Send and receive transports.
//!
//! [`TransportManager`] owns the two direction slots and is only touched by
//! the session actor. [`TransportCreator`] runs the network half of
//! creation (`createTransport`, then engine construction) in a spawned task;
//! the result is handed back to the actor to install.
//!
//! Each transport gets a [`HandshakeListener`] that answers the engine's
//! connect and produce callbacks through the signaling peer and reports
//! connection-state changes to the actor.

use crate::actors::{MailboxNotifier, SessionMessage};
use crate::engine::{MediaEngine, MediaTransport, TransportListener, TransportParameters};
use crate::errors::SessionError;
use crate::signaling::{
    ConnectTransportRequest, CreateTransportRequest, SfuClient, TransportProduceRequest,
};
use crate::types::{ConnectionState, MediaKind, ProducerId, TransportDirection, TransportId};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Installed transport with its last known connection state.
struct TransportSlot {
    transport: Arc<dyn MediaTransport>,
    state: ConnectionState,
}

#[derive(Default)]
struct DirectionSlot {
    current: Option<TransportSlot>,
    creating: bool,
}

impl DirectionSlot {
    fn is_live(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|slot| !slot.state.is_terminal())
    }
}

/// At most one live transport per direction.
///
/// A transport that reached `closed` or `failed` is never revived; its slot
/// can only be taken by a newly created transport.
#[derive(Default)]
pub struct TransportManager {
    send: DirectionSlot,
    receive: DirectionSlot,
}

impl TransportManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, direction: TransportDirection) -> &DirectionSlot {
        match direction {
            TransportDirection::Send => &self.send,
            TransportDirection::Receive => &self.receive,
        }
    }

    fn slot_mut(&mut self, direction: TransportDirection) -> &mut DirectionSlot {
        match direction {
            TransportDirection::Send => &mut self.send,
            TransportDirection::Receive => &mut self.receive,
        }
    }

    /// Reserve the direction for a creation attempt.
    ///
    /// Fails with `TransportExists` while a live transport or another
    /// attempt holds the slot.
    pub fn begin_creation(&mut self, direction: TransportDirection) -> Result<(), SessionError> {
        let slot = self.slot_mut(direction);
        if slot.creating || slot.is_live() {
            return Err(SessionError::TransportExists(direction));
        }
        slot.creating = true;
        Ok(())
    }

    /// Release a reservation after a failed attempt.
    pub fn abort_creation(&mut self, direction: TransportDirection) {
        self.slot_mut(direction).creating = false;
    }

    /// Whether a creation attempt is in flight for the direction.
    #[must_use]
    pub fn is_creating(&self, direction: TransportDirection) -> bool {
        self.slot(direction).creating
    }

    /// Install a newly created transport, replacing a terminal one.
    pub fn install(&mut self, transport: Arc<dyn MediaTransport>) -> Result<(), SessionError> {
        let direction = transport.direction();
        let slot = self.slot_mut(direction);
        slot.creating = false;

        if slot.is_live() {
            return Err(SessionError::TransportExists(direction));
        }
        if let Some(previous) = slot.current.take() {
            if !previous.transport.is_closed() {
                previous.transport.close();
            }
        }

        info!(
            target: "media.session.transport",
            transport_id = %transport.id(),
            direction = direction.as_str(),
            "Transport installed"
        );
        slot.current = Some(TransportSlot {
            transport,
            state: ConnectionState::New,
        });
        Ok(())
    }

    /// The live transport for a direction, if any.
    #[must_use]
    pub fn live(&self, direction: TransportDirection) -> Option<Arc<dyn MediaTransport>> {
        let slot = self.slot(direction);
        if !slot.is_live() {
            return None;
        }
        slot.current.as_ref().map(|s| Arc::clone(&s.transport))
    }

    /// Whether `transport_id` is the live transport of its slot.
    #[must_use]
    pub fn is_live(&self, transport_id: &TransportId) -> bool {
        [&self.send, &self.receive].into_iter().any(|slot| {
            slot.is_live()
                && slot
                    .current
                    .as_ref()
                    .is_some_and(|s| s.transport.id() == transport_id)
        })
    }

    /// Connection state of the transport in a direction.
    #[must_use]
    pub fn state(&self, direction: TransportDirection) -> Option<ConnectionState> {
        self.slot(direction).current.as_ref().map(|s| s.state)
    }

    /// Apply a reported state change.
    ///
    /// Returns the direction when the change applied. Reports for replaced
    /// transports and anything after `closed` are ignored.
    pub fn set_state(
        &mut self,
        transport_id: &TransportId,
        state: ConnectionState,
    ) -> Option<TransportDirection> {
        for direction in [TransportDirection::Send, TransportDirection::Receive] {
            let Some(slot) = self.slot_mut(direction).current.as_mut() else {
                continue;
            };
            if slot.transport.id() != transport_id {
                continue;
            }
            if slot.state == ConnectionState::Closed || slot.state == state {
                return None;
            }
            slot.state = state;
            return Some(direction);
        }
        None
    }

    /// Close both transports. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for direction in [TransportDirection::Send, TransportDirection::Receive] {
            let slot = self.slot_mut(direction);
            slot.creating = false;
            if let Some(current) = slot.current.as_mut() {
                if current.state != ConnectionState::Closed {
                    current.transport.close();
                    current.state = ConnectionState::Closed;
                    closed += 1;
                }
            }
        }
        closed
    }
}

/// Creates transports off the actor task.
#[derive(Clone)]
pub struct TransportCreator {
    client: SfuClient,
    engine: Arc<dyn MediaEngine>,
    notifier: MailboxNotifier,
}

impl TransportCreator {
    pub(crate) fn new(
        client: SfuClient,
        engine: Arc<dyn MediaEngine>,
        notifier: MailboxNotifier,
    ) -> Self {
        Self {
            client,
            engine,
            notifier,
        }
    }

    /// Request parameters from the server and build the local transport.
    ///
    /// Nothing is retried; the first failure is returned.
    pub async fn create(
        &self,
        direction: TransportDirection,
    ) -> Result<Arc<dyn MediaTransport>, SessionError> {
        let request = match direction {
            TransportDirection::Send => CreateTransportRequest {
                sctp_capabilities: self.engine.capabilities().sctp_capabilities,
                producing: true,
                consuming: false,
            },
            TransportDirection::Receive => CreateTransportRequest {
                sctp_capabilities: None,
                producing: false,
                consuming: true,
            },
        };

        let options = self.client.create_transport(&request).await.map_err(|e| {
            warn!(
                target: "media.session.transport",
                direction = direction.as_str(),
                error = %e,
                "Server rejected transport creation"
            );
            SessionError::TransportCreation {
                direction,
                reason: e.to_string(),
            }
        })?;

        let listener: Arc<dyn TransportListener> = Arc::new(HandshakeListener {
            client: self.client.clone(),
            transport_id: options.id.clone(),
            direction,
            notifier: self.notifier.clone(),
        });

        debug!(
            target: "media.session.transport",
            transport_id = %options.id,
            direction = direction.as_str(),
            "Transport options received, building local transport"
        );

        let built = match direction {
            TransportDirection::Send => {
                self.engine
                    .create_send_transport(TransportParameters::for_send(options), listener)
                    .await
            }
            TransportDirection::Receive => {
                self.engine
                    .create_recv_transport(TransportParameters::for_receive(options), listener)
                    .await
            }
        };

        built.map_err(|e| SessionError::TransportCreation {
            direction,
            reason: e.to_string(),
        })
    }
}

/// Answers a transport's handshake callbacks through the signaling peer.
pub struct HandshakeListener {
    client: SfuClient,
    transport_id: TransportId,
    direction: TransportDirection,
    notifier: MailboxNotifier,
}

impl HandshakeListener {
    fn report(&self, state: ConnectionState) {
        self.notifier.notify(SessionMessage::TransportStateChanged {
            transport_id: self.transport_id.clone(),
            direction: self.direction,
            state,
        });
    }
}

#[async_trait]
impl TransportListener for HandshakeListener {
    async fn connect(&self, dtls_parameters: Value) -> Result<(), SessionError> {
        debug!(
            target: "media.session.transport",
            transport_id = %self.transport_id,
            direction = self.direction.as_str(),
            "Connecting transport"
        );
        self.report(ConnectionState::Connecting);

        let request = ConnectTransportRequest {
            transport_id: self.transport_id.clone(),
            dtls_parameters,
        };

        match self.client.connect_transport(&request).await {
            Ok(()) => {
                info!(
                    target: "media.session.transport",
                    transport_id = %self.transport_id,
                    direction = self.direction.as_str(),
                    "Transport connected"
                );
                self.report(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "media.session.transport",
                    transport_id = %self.transport_id,
                    direction = self.direction.as_str(),
                    error = %e,
                    "Transport connect rejected"
                );
                self.report(ConnectionState::Failed);
                Err(SessionError::TransportConnect {
                    transport_id: self.transport_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> Result<ProducerId, SessionError> {
        if self.direction != TransportDirection::Send {
            return Err(SessionError::Produce(format!(
                "transport {} cannot produce",
                self.transport_id
            )));
        }

        let request = TransportProduceRequest {
            transport_id: self.transport_id.clone(),
            kind,
            rtp_parameters,
            app_data,
        };

        let producer_id = self
            .client
            .transport_produce(&request)
            .await
            .map_err(|e| {
                warn!(
                    target: "media.session.transport",
                    transport_id = %self.transport_id,
                    kind = kind.as_str(),
                    error = %e,
                    "Produce rejected"
                );
                SessionError::Produce(e.to_string())
            })?;

        info!(
            target: "media.session.transport",
            transport_id = %self.transport_id,
            producer_id = %producer_id,
            kind = kind.as_str(),
            "Producer created"
        );
        Ok(producer_id)
    }

    fn connection_state_changed(&self, state: ConnectionState) {
        self.report(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{ConsumeOptions, MediaConsumer, ProduceOptions};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubTransport {
        id: TransportId,
        direction: TransportDirection,
        closed: AtomicBool,
    }

    impl StubTransport {
        fn new(id: &str, direction: TransportDirection) -> Arc<Self> {
            Arc::new(Self {
                id: TransportId::new(id),
                direction,
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl MediaTransport for StubTransport {
        fn id(&self) -> &TransportId {
            &self.id
        }

        fn direction(&self) -> TransportDirection {
            self.direction
        }

        async fn consume(
            &self,
            _options: ConsumeOptions,
        ) -> Result<Arc<dyn MediaConsumer>, SessionError> {
            Err(SessionError::Engine("not supported".to_string()))
        }

        async fn produce(&self, _options: ProduceOptions) -> Result<ProducerId, SessionError> {
            Err(SessionError::Engine("not supported".to_string()))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_install_one_transport_per_direction() {
        let mut manager = TransportManager::new();
        manager
            .install(StubTransport::new("send-1", TransportDirection::Send))
            .unwrap();
        manager
            .install(StubTransport::new("recv-1", TransportDirection::Receive))
            .unwrap();

        let result = manager.install(StubTransport::new("send-2", TransportDirection::Send));
        assert!(matches!(
            result,
            Err(SessionError::TransportExists(TransportDirection::Send))
        ));
        assert_eq!(
            manager.live(TransportDirection::Send).unwrap().id(),
            &TransportId::new("send-1")
        );
        assert_eq!(
            manager.state(TransportDirection::Receive),
            Some(ConnectionState::New)
        );
    }

    #[test]
    fn test_begin_creation_reserves_slot() {
        let mut manager = TransportManager::new();
        manager.begin_creation(TransportDirection::Receive).unwrap();
        assert!(manager.is_creating(TransportDirection::Receive));
        assert!(manager.begin_creation(TransportDirection::Receive).is_err());
        assert!(manager.begin_creation(TransportDirection::Send).is_ok());

        manager.abort_creation(TransportDirection::Receive);
        assert!(!manager.is_creating(TransportDirection::Receive));
        assert!(manager.begin_creation(TransportDirection::Receive).is_ok());
    }

    #[test]
    fn test_failed_transport_is_replaced_not_revived() {
        let mut manager = TransportManager::new();
        let first = StubTransport::new("send-1", TransportDirection::Send);
        manager.install(first.clone()).unwrap();

        assert_eq!(
            manager.set_state(&TransportId::new("send-1"), ConnectionState::Failed),
            Some(TransportDirection::Send)
        );
        assert!(manager.live(TransportDirection::Send).is_none());
        assert!(!manager.is_live(&TransportId::new("send-1")));

        manager
            .install(StubTransport::new("send-2", TransportDirection::Send))
            .unwrap();
        assert!(first.is_closed());
        assert!(manager.is_live(&TransportId::new("send-2")));
        assert_eq!(
            manager.set_state(&TransportId::new("send-1"), ConnectionState::Connected),
            None
        );
    }

    #[test]
    fn test_closed_is_terminal_for_state_reports() {
        let mut manager = TransportManager::new();
        manager
            .install(StubTransport::new("recv-1", TransportDirection::Receive))
            .unwrap();

        manager.set_state(&TransportId::new("recv-1"), ConnectionState::Closed);
        assert_eq!(
            manager.set_state(&TransportId::new("recv-1"), ConnectionState::Connected),
            None
        );
        assert_eq!(
            manager.state(TransportDirection::Receive),
            Some(ConnectionState::Closed)
        );
    }

    #[test]
    fn test_close_all_closes_each_transport_once() {
        let mut manager = TransportManager::new();
        let send = StubTransport::new("send-1", TransportDirection::Send);
        let recv = StubTransport::new("recv-1", TransportDirection::Receive);
        manager.install(send.clone()).unwrap();
        manager.install(recv.clone()).unwrap();

        assert_eq!(manager.close_all(), 2);
        assert!(send.is_closed());
        assert!(recv.is_closed());
        assert_eq!(manager.close_all(), 0);
        assert!(manager.live(TransportDirection::Receive).is_none());
    }
}
