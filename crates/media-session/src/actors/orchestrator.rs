//! `SessionOrchestrator` - the media session actor.
//!
//! One task owns all session state (lifecycle flag, transports, consumer
//! registry, producer tracker) and processes its mailbox in arrival order.
//! The handler never awaits: network work (initialize handshake, transport
//! creation, `consume`, layer changes) runs in spawned tasks that post a
//! continuation back to the mailbox. Continuations check liveness first, so
//! anything that completes after close is a no-op (late transports and
//! consumers are closed on arrival).
//!
//! # Lifecycle
//!
//! 1. Spawned at conference join; subscribes to every signaling event
//! 2. `initialize()` moves `uninitialized -> initializing -> ready`
//! 3. `close()` (or cancellation) moves to `closed` and releases everything
//! 4. The task keeps answering queries until cancelled or every handle drops
//!
//! Only weak senders are held by the actor itself and by signaling handlers,
//! so dropping the last [`SessionHandle`] ends the task.

use super::messages::{InitializeResult, SessionMessage, SessionState};
use super::metrics::MailboxMonitor;

use crate::config::SessionConfig;
use crate::consumers::{ConsumerRegistry, ConsumerSnapshot, ConsumerStatusInfo};
use crate::engine::{ConsumeOptions, MediaConsumer, MediaEngine, MediaTransport, ProduceOptions};
use crate::errors::{SessionError, SignalingError};
use crate::events::{SessionEvent, SessionEventBus};
use crate::layers::{LayerController, LayerPlan};
use crate::observability::{
    record_event_dropped, record_layer_request, record_operation_error, record_signaling_event,
    record_transport_state, record_unknown_entity_event, set_consumers_active,
    LayerRequestOutcome,
};
use crate::producers::{ProducerLifecycleTracker, ProducerState};
use crate::signaling::{
    event_names, ChangeStreamRequest, EventHandler, NewConsumerEvent, SetConsumerLayersRequest,
    SfuClient, SignalingChannel, SignalingEvent, Subscription,
};
use crate::transport::{TransportCreator, TransportManager};
use crate::types::{
    ConnectionState, ConsumerId, ConsumerLayers, MediaKind, ParticipantId, ProducerId,
    ProducerSource, TransportDirection, TransportId,
};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Non-blocking delivery into the session mailbox.
///
/// Used from synchronous callbacks (signaling handlers, transport state
/// reports) that cannot await capacity. A full mailbox drops the message
/// and counts it.
#[derive(Clone)]
pub(crate) struct MailboxNotifier {
    sender: mpsc::WeakSender<SessionMessage>,
    monitor: Arc<MailboxMonitor>,
}

impl MailboxNotifier {
    fn new(sender: &mpsc::Sender<SessionMessage>, monitor: Arc<MailboxMonitor>) -> Self {
        Self {
            sender: sender.downgrade(),
            monitor,
        }
    }

    /// Strong sender for a spawned task that must not lose its continuation.
    fn upgrade(&self) -> Option<mpsc::Sender<SessionMessage>> {
        self.sender.upgrade()
    }

    /// Try to deliver a message. Returns `false` if it was dropped.
    pub(crate) fn notify(&self, message: SessionMessage) -> bool {
        let Some(sender) = self.sender.upgrade() else {
            debug!(
                target: "media.session",
                message = message.name(),
                "Session gone, discarding message"
            );
            return false;
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                self.monitor.record_drop();
                record_event_dropped("mailbox_full");
                warn!(
                    target: "media.session",
                    message = message.name(),
                    "Session mailbox full, message dropped"
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(
                    target: "media.session",
                    message = message.name(),
                    "Session mailbox closed, discarding message"
                );
                false
            }
        }
    }
}

/// A `consume` call in flight.
struct PendingConsume {
    consumer_id: ConsumerId,
    /// Set once the server closed the consumer or the session closed.
    cancelled: bool,
}

/// Handle to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    events: SessionEventBus,
    cancel_token: CancellationToken,
    session_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionHandle {
    /// Session id (used as the tracing span field).
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Send a fallible request and count its failure under `operation`.
    async fn request_observed<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let result = self.request(build).await.and_then(|r| r);
        if let Err(e) = &result {
            record_operation_error(operation, e.error_type_label());
        }
        result
    }

    /// Run the initialization protocol.
    ///
    /// Queries local capabilities, sends them to the server, then creates
    /// the send transport (only if audio or video can be produced) and the
    /// receive transport. A rejected handshake closes the session and
    /// returns `InitializationFailed`. A transport failure after a good
    /// handshake is returned as-is while the session stays `ready`; the
    /// other direction is still attempted.
    pub async fn initialize(&self) -> Result<InitializeResult, SessionError> {
        self.request_observed("initialize", |respond_to| SessionMessage::Initialize {
            respond_to,
        })
        .await
    }

    /// Close the session. Idempotent and infallible.
    pub async fn close(&self) {
        if let Err(e) = self
            .request(|respond_to| SessionMessage::Close { respond_to })
            .await
        {
            debug!(
                target: "media.session",
                session_id = %self.session_id,
                error = %e,
                "Close requested on a stopped session"
            );
        }
    }

    pub async fn get_consumers(&self) -> Result<Vec<ConsumerSnapshot>, SessionError> {
        self.request(|respond_to| SessionMessage::GetConsumers { respond_to })
            .await
    }

    pub async fn get_consumer(
        &self,
        consumer_id: ConsumerId,
    ) -> Result<Option<ConsumerSnapshot>, SessionError> {
        self.request(|respond_to| SessionMessage::GetConsumer {
            consumer_id,
            respond_to,
        })
        .await
    }

    /// Status side-record of a consumer; `None` once it is closed.
    pub async fn get_consumer_info(
        &self,
        consumer_id: ConsumerId,
    ) -> Result<Option<ConsumerStatusInfo>, SessionError> {
        self.request(|respond_to| SessionMessage::GetConsumerInfo {
            consumer_id,
            respond_to,
        })
        .await
    }

    pub async fn get_producer_state(
        &self,
        source: ProducerSource,
    ) -> Result<Option<ProducerState>, SessionError> {
        self.request(|respond_to| SessionMessage::GetProducerState { source, respond_to })
            .await
    }

    /// Request the spatial layer matching a rendered tile width.
    ///
    /// Unknown consumers and unchanged layers return `Ok` without a network
    /// call. A rejected request returns `LayerChange` and leaves the cached
    /// preference untouched.
    pub async fn request_layer(
        &self,
        consumer_id: ConsumerId,
        width: u32,
    ) -> Result<(), SessionError> {
        self.request_observed("request_layer", |respond_to| {
            SessionMessage::RequestLayer {
                consumer_id,
                width,
                respond_to,
            }
        })
        .await
    }

    /// Request explicit layers; same suppression and cache rules as
    /// [`SessionHandle::request_layer`].
    pub async fn set_consumer_layers(
        &self,
        consumer_id: ConsumerId,
        layers: ConsumerLayers,
    ) -> Result<(), SessionError> {
        self.request_observed("set_consumer_layers", |respond_to| {
            SessionMessage::SetConsumerLayers {
                consumer_id,
                layers,
                respond_to,
            }
        })
        .await
    }

    /// Pause, resume or close a producer or consumer on the server.
    pub async fn change_stream(&self, request: ChangeStreamRequest) -> Result<(), SessionError> {
        self.request_observed("change_stream", |respond_to| {
            SessionMessage::ChangeStream {
                request,
                respond_to,
            }
        })
        .await
    }

    /// Publish a local track on the send transport.
    pub async fn produce(&self, options: ProduceOptions) -> Result<ProducerId, SessionError> {
        self.request_observed("produce", |respond_to| SessionMessage::Produce {
            options,
            respond_to,
        })
        .await
    }

    pub async fn create_send_transport(&self) -> Result<TransportId, SessionError> {
        self.create_transport(TransportDirection::Send).await
    }

    pub async fn create_receive_transport(&self) -> Result<TransportId, SessionError> {
        self.create_transport(TransportDirection::Receive).await
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<TransportId, SessionError> {
        self.request_observed("create_transport", |respond_to| {
            SessionMessage::CreateTransport {
                direction,
                respond_to,
            }
        })
        .await
    }

    pub async fn transport_state(
        &self,
        direction: TransportDirection,
    ) -> Result<Option<ConnectionState>, SessionError> {
        self.request(|respond_to| SessionMessage::GetTransportState {
            direction,
            respond_to,
        })
        .await
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    /// Capabilities reported by the last successful initialize.
    pub async fn capabilities(&self) -> Result<Option<InitializeResult>, SessionError> {
        self.request(|respond_to| SessionMessage::GetCapabilities { respond_to })
            .await
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Mailbox depth and drop counters of the actor.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    /// Stop the actor. Equivalent to `close()` followed by task exit.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The session actor.
pub struct SessionOrchestrator {
    session_id: String,
    receiver: mpsc::Receiver<SessionMessage>,
    notifier: MailboxNotifier,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    client: SfuClient,
    engine: Arc<dyn MediaEngine>,
    creator: TransportCreator,
    events: SessionEventBus,
    state: SessionState,
    capabilities: Option<InitializeResult>,
    subscriptions: Vec<Subscription>,
    transports: TransportManager,
    consumers: ConsumerRegistry,
    producers: ProducerLifecycleTracker,
    layers: LayerController,
    /// `consume` calls in flight, by attempt number.
    in_flight_consumers: HashMap<u64, PendingConsume>,
    next_consume_attempt: u64,
    /// New-consumer events held while the receive transport is being created.
    deferred_consumers: Vec<NewConsumerEvent>,
    deferred_limit: usize,
}

impl SessionOrchestrator {
    /// Spawn a session actor and subscribe it to every signaling event.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: SessionConfig,
        channel: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let session_id = Uuid::new_v4().to_string();
        let capacity = config.mailbox_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        let mailbox = Arc::new(MailboxMonitor::new(&session_id));
        let notifier = MailboxNotifier::new(&sender, Arc::clone(&mailbox));
        let events = SessionEventBus::new(config.event_bus_capacity);
        let client = SfuClient::new(channel);
        let creator = TransportCreator::new(client.clone(), Arc::clone(&engine), notifier.clone());
        let subscriptions = subscribe_all(client.channel(), &notifier);

        let actor = Self {
            session_id: session_id.clone(),
            receiver,
            notifier,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            client,
            engine,
            creator,
            events: events.clone(),
            state: SessionState::Uninitialized,
            capabilities: None,
            subscriptions,
            transports: TransportManager::new(),
            consumers: ConsumerRegistry::new(),
            producers: ProducerLifecycleTracker::new(),
            layers: LayerController::new(config.layer_thresholds),
            in_flight_consumers: HashMap::new(),
            next_consume_attempt: 0,
            deferred_consumers: Vec::new(),
            deferred_limit: capacity,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            events,
            cancel_token,
            session_id,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "media.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!(
            target: "media.session",
            session_id = %self.session_id,
            subscriptions = self.subscriptions.len(),
            "Session actor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "media.session",
                        session_id = %self.session_id,
                        "Session actor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len());
                            self.handle_message(message);
                            self.mailbox.record_processed();
                        }
                        None => {
                            debug!(
                                target: "media.session",
                                session_id = %self.session_id,
                                "Session channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.teardown("actor stopped");

        info!(
            target: "media.session",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "Session actor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Initialize { respond_to } => self.handle_initialize(respond_to),

            SessionMessage::Close { respond_to } => {
                if !self.teardown("close requested") {
                    debug!(
                        target: "media.session",
                        session_id = %self.session_id,
                        "Session already closed"
                    );
                }
                let _ = respond_to.send(());
            }

            SessionMessage::GetConsumers { respond_to } => {
                let _ = respond_to.send(self.consumers.all());
            }

            SessionMessage::GetConsumer {
                consumer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.consumers.get(&consumer_id));
            }

            SessionMessage::GetConsumerInfo {
                consumer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.consumers.get_status(&consumer_id));
            }

            SessionMessage::GetProducerState { source, respond_to } => {
                let _ = respond_to.send(self.producers.get(source).cloned());
            }

            SessionMessage::RequestLayer {
                consumer_id,
                width,
                respond_to,
            } => {
                let plan = self
                    .layers
                    .plan_for_width(&self.consumers, &consumer_id, width);
                self.handle_layer_plan(consumer_id, plan, respond_to);
            }

            SessionMessage::SetConsumerLayers {
                consumer_id,
                layers,
                respond_to,
            } => {
                let plan = self.layers.plan(&self.consumers, &consumer_id, layers);
                self.handle_layer_plan(consumer_id, plan, respond_to);
            }

            SessionMessage::ChangeStream {
                request,
                respond_to,
            } => self.handle_change_stream(request, respond_to),

            SessionMessage::Produce {
                options,
                respond_to,
            } => self.handle_produce(options, respond_to),

            SessionMessage::CreateTransport {
                direction,
                respond_to,
            } => self.handle_create_transport(direction, respond_to),

            SessionMessage::GetTransportState {
                direction,
                respond_to,
            } => {
                let _ = respond_to.send(self.transports.state(direction));
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state);
            }

            SessionMessage::GetCapabilities { respond_to } => {
                let _ = respond_to.send(self.capabilities);
            }

            SessionMessage::Signaling(event) => self.handle_signaling(event),

            SessionMessage::TransportStateChanged {
                transport_id,
                direction,
                state,
            } => self.handle_transport_state(&transport_id, direction, state),

            SessionMessage::InitializeCompleted {
                capabilities,
                result,
                respond_to,
            } => self.handle_initialize_completed(capabilities, result, respond_to),

            SessionMessage::InstallTransport {
                direction,
                result,
                respond_to,
            } => self.handle_install_transport(direction, result, respond_to),

            SessionMessage::ConsumerCreated {
                attempt,
                consumer_id,
                participant_id,
                transport_id,
                producer_paused,
                result,
            } => self.handle_consumer_created(
                attempt,
                consumer_id,
                participant_id,
                transport_id,
                producer_paused,
                result,
            ),

            SessionMessage::LayerRequestCompleted {
                consumer_id,
                layers,
                result,
                respond_to,
            } => self.handle_layer_completed(consumer_id, layers, result, respond_to),
        }
    }

    fn require_ready(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(SessionError::SessionClosed),
            SessionState::Uninitialized | SessionState::Initializing => {
                Err(SessionError::NotReady)
            }
        }
    }

    // --- Initialization ---

    fn handle_initialize(
        &mut self,
        respond_to: oneshot::Sender<Result<InitializeResult, SessionError>>,
    ) {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Closed => {
                let _ = respond_to.send(Err(SessionError::SessionClosed));
                return;
            }
            SessionState::Initializing | SessionState::Ready => {
                let _ = respond_to.send(Err(SessionError::AlreadyInitialized));
                return;
            }
        }

        let Some(sender) = self.notifier.upgrade() else {
            let _ = respond_to.send(Err(SessionError::Internal(
                "session mailbox closed".to_string(),
            )));
            return;
        };

        self.state = SessionState::Initializing;
        let capabilities = InitializeResult {
            can_produce_audio: self.engine.can_produce(MediaKind::Audio),
            can_produce_video: self.engine.can_produce(MediaKind::Video),
        };
        let device = self.engine.capabilities();
        let client = self.client.clone();

        info!(
            target: "media.session",
            session_id = %self.session_id,
            can_produce_audio = capabilities.can_produce_audio,
            can_produce_video = capabilities.can_produce_video,
            "Initializing session"
        );

        tokio::spawn(async move {
            let result = client.initialize_connection(&device).await;
            let _ = sender
                .send(SessionMessage::InitializeCompleted {
                    capabilities,
                    result,
                    respond_to,
                })
                .await;
        });
    }

    fn handle_initialize_completed(
        &mut self,
        capabilities: InitializeResult,
        result: Result<Value, SignalingError>,
        respond_to: oneshot::Sender<Result<InitializeResult, SessionError>>,
    ) {
        if self.state != SessionState::Initializing {
            let _ = respond_to.send(Err(SessionError::SessionClosed));
            return;
        }

        if let Err(e) = result {
            warn!(
                target: "media.session",
                session_id = %self.session_id,
                error = %e,
                "Initialization rejected, closing session"
            );
            self.teardown("initialization failed");
            let _ = respond_to.send(Err(SessionError::InitializationFailed(e.to_string())));
            return;
        }

        self.state = SessionState::Ready;
        self.capabilities = Some(capabilities);

        info!(
            target: "media.session",
            session_id = %self.session_id,
            "Session ready"
        );

        let mut directions = Vec::with_capacity(2);
        if capabilities.can_produce() {
            directions.push(TransportDirection::Send);
        }
        directions.push(TransportDirection::Receive);
        directions.retain(|&direction| self.transports.begin_creation(direction).is_ok());

        let Some(sender) = self.notifier.upgrade() else {
            let _ = respond_to.send(Err(SessionError::Internal(
                "session mailbox closed".to_string(),
            )));
            return;
        };
        let creator = self.creator.clone();

        // Sequential: send first, then receive. A failure in one direction
        // does not stop the other; a close does.
        tokio::spawn(async move {
            let mut first_error = None;
            for direction in directions {
                if sender.is_closed() {
                    first_error.get_or_insert(SessionError::SessionClosed);
                    break;
                }
                let result = creator.create(direction).await;
                let (tx, rx) = oneshot::channel();
                let sent = sender
                    .send(SessionMessage::InstallTransport {
                        direction,
                        result,
                        respond_to: tx,
                    })
                    .await;
                let installed = match sent {
                    Ok(()) => rx.await.map_err(|e| {
                        SessionError::Internal(format!("response receive failed: {e}"))
                    }),
                    Err(e) => Err(SessionError::Internal(format!("channel send failed: {e}"))),
                };
                match installed {
                    Ok(Ok(_)) => {}
                    Ok(Err(SessionError::SessionClosed)) => {
                        first_error = Some(SessionError::SessionClosed);
                        break;
                    }
                    Ok(Err(e)) | Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            let _ = respond_to.send(match first_error {
                Some(e) => Err(e),
                None => Ok(capabilities),
            });
        });
    }

    // --- Transports ---

    fn handle_create_transport(
        &mut self,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportId, SessionError>>,
    ) {
        if let Err(e) = self
            .require_ready()
            .and_then(|()| self.transports.begin_creation(direction))
        {
            let _ = respond_to.send(Err(e));
            return;
        }

        let Some(sender) = self.notifier.upgrade() else {
            self.transports.abort_creation(direction);
            let _ = respond_to.send(Err(SessionError::Internal(
                "session mailbox closed".to_string(),
            )));
            return;
        };
        let creator = self.creator.clone();

        tokio::spawn(async move {
            let result = creator.create(direction).await;
            let _ = sender
                .send(SessionMessage::InstallTransport {
                    direction,
                    result,
                    respond_to,
                })
                .await;
        });
    }

    fn handle_install_transport(
        &mut self,
        direction: TransportDirection,
        result: Result<Arc<dyn MediaTransport>, SessionError>,
        respond_to: oneshot::Sender<Result<TransportId, SessionError>>,
    ) {
        if self.state != SessionState::Ready {
            self.transports.abort_creation(direction);
            if let Ok(transport) = result {
                transport.close();
                debug!(
                    target: "media.session.transport",
                    session_id = %self.session_id,
                    transport_id = %transport.id(),
                    "Transport created after close, closing it"
                );
            }
            let _ = respond_to.send(Err(SessionError::SessionClosed));
            return;
        }

        let transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                self.transports.abort_creation(direction);
                warn!(
                    target: "media.session.transport",
                    session_id = %self.session_id,
                    direction = direction.as_str(),
                    error = %e,
                    "Transport creation failed"
                );
                if direction == TransportDirection::Receive {
                    self.drop_deferred_consumers();
                }
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        let transport_id = transport.id().clone();
        match self.transports.install(Arc::clone(&transport)) {
            Ok(()) => {
                record_transport_state(direction.as_str(), ConnectionState::New.as_str());
                if direction == TransportDirection::Receive {
                    self.replay_deferred_consumers();
                }
                let _ = respond_to.send(Ok(transport_id));
            }
            Err(e) => {
                transport.close();
                let _ = respond_to.send(Err(e));
            }
        }
    }

    fn handle_transport_state(
        &mut self,
        transport_id: &TransportId,
        direction: TransportDirection,
        state: ConnectionState,
    ) {
        if self.transports.set_state(transport_id, state).is_none() {
            debug!(
                target: "media.session.transport",
                transport_id = %transport_id,
                direction = direction.as_str(),
                state = state.as_str(),
                "Ignoring state report for a stale transport"
            );
            return;
        }
        record_transport_state(direction.as_str(), state.as_str());

        match state {
            ConnectionState::Failed => {
                warn!(
                    target: "media.session.transport",
                    transport_id = %transport_id,
                    direction = direction.as_str(),
                    "Transport failed"
                );
            }
            ConnectionState::Closed => {
                let removed = self.consumers.remove_for_transport(transport_id);
                info!(
                    target: "media.session.transport",
                    transport_id = %transport_id,
                    direction = direction.as_str(),
                    consumers_removed = removed.len(),
                    "Transport closed"
                );
                if !removed.is_empty() {
                    set_consumers_active(self.consumers.len());
                    self.events.emit(SessionEvent::ConsumersChanged);
                }
            }
            ConnectionState::New | ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(
                    target: "media.session.transport",
                    transport_id = %transport_id,
                    direction = direction.as_str(),
                    state = state.as_str(),
                    "Transport state changed"
                );
            }
        }
    }

    fn handle_produce(
        &mut self,
        options: ProduceOptions,
        respond_to: oneshot::Sender<Result<ProducerId, SessionError>>,
    ) {
        if let Err(e) = self.require_ready() {
            let _ = respond_to.send(Err(e));
            return;
        }
        let Some(transport) = self.transports.live(TransportDirection::Send) else {
            let _ = respond_to.send(Err(SessionError::TransportUnavailable(
                TransportDirection::Send,
            )));
            return;
        };

        debug!(
            target: "media.session.transport",
            transport_id = %transport.id(),
            kind = options.kind.as_str(),
            source = options.source.as_str(),
            "Producing local track"
        );

        tokio::spawn(async move {
            let _ = respond_to.send(transport.produce(options).await);
        });
    }

    fn handle_change_stream(
        &mut self,
        request: ChangeStreamRequest,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    ) {
        if let Err(e) = self.require_ready() {
            let _ = respond_to.send(Err(e));
            return;
        }
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = client.change_stream(&request).await.map_err(|e| {
                warn!(
                    target: "media.session",
                    stream_id = %request.id,
                    error = %e,
                    "Change stream rejected"
                );
                SessionError::ChangeStream(e.to_string())
            });
            let _ = respond_to.send(result);
        });
    }

    // --- Consumers ---

    fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::NewConsumer(payload) => self.handle_new_consumer(payload),

            SignalingEvent::ConsumerClosed(payload) => {
                let id = payload.consumer_id;
                let pending = self.cancel_pending_consumer(&id);
                self.layers.forget(&id);
                match self.consumers.remove(&id) {
                    Some(_) => {
                        info!(
                            target: "media.session.consumers",
                            consumer_id = %id,
                            "Consumer removed"
                        );
                        set_consumers_active(self.consumers.len());
                        self.events.emit(SessionEvent::ConsumerUpdated {
                            consumer_id: id,
                        });
                        self.events.emit(SessionEvent::ConsumersChanged);
                    }
                    None if pending => {}
                    None => self.unknown_consumer(event_names::CONSUMER_CLOSED, &id),
                }
            }

            SignalingEvent::ConsumerPaused(payload) => {
                let id = payload.consumer_id;
                if self.consumers.pause(&id) {
                    debug!(target: "media.session.consumers", consumer_id = %id, "Consumer paused");
                    self.events.emit(SessionEvent::ConsumerUpdated {
                        consumer_id: id.clone(),
                    });
                    self.events
                        .emit(SessionEvent::StatusInfoUpdated { consumer_id: id });
                } else {
                    self.unknown_consumer(event_names::CONSUMER_PAUSED, &id);
                }
            }

            SignalingEvent::ConsumerResumed(payload) => {
                let id = payload.consumer_id;
                if self.consumers.resume(&id) {
                    debug!(target: "media.session.consumers", consumer_id = %id, "Consumer resumed");
                    self.events
                        .emit(SessionEvent::ConsumerUpdated { consumer_id: id });
                } else {
                    self.unknown_consumer(event_names::CONSUMER_RESUMED, &id);
                }
            }

            SignalingEvent::ConsumerScore(payload) => {
                let id = payload.consumer_id;
                if self.consumers.update_score(&id, payload.score) {
                    self.events
                        .emit(SessionEvent::StatusInfoUpdated { consumer_id: id });
                } else {
                    self.unknown_consumer(event_names::CONSUMER_SCORE, &id);
                }
            }

            SignalingEvent::LayersChanged(payload) => {
                let id = payload.consumer_id;
                if self.consumers.update_current_layers(&id, payload.layers) {
                    self.events
                        .emit(SessionEvent::StatusInfoUpdated { consumer_id: id });
                } else {
                    self.unknown_consumer(event_names::LAYERS_CHANGED, &id);
                }
            }

            SignalingEvent::ProducerChanged(payload) => {
                let state = self.producers.apply(&payload);
                info!(
                    target: "media.session",
                    session_id = %self.session_id,
                    source = payload.source.as_str(),
                    producer_id = %state.producer_id,
                    status = ?state.status,
                    "Producer changed by server"
                );
                self.events.emit(SessionEvent::ProducerChanged {
                    source: payload.source,
                    action: payload.action,
                    producer_id: payload.producer_id,
                });
            }
        }
    }

    fn unknown_consumer(&self, event: &'static str, consumer_id: &ConsumerId) {
        debug!(
            target: "media.session.consumers",
            event = event,
            consumer_id = %consumer_id,
            "Event for unknown consumer ignored"
        );
        record_unknown_entity_event(event);
    }

    /// Mark an in-flight or deferred consumer as closed. Returns whether one
    /// existed.
    fn cancel_pending_consumer(&mut self, consumer_id: &ConsumerId) -> bool {
        let mut pending = false;
        for attempt in self.in_flight_consumers.values_mut() {
            if &attempt.consumer_id == consumer_id {
                attempt.cancelled = true;
                pending = true;
            }
        }
        let before = self.deferred_consumers.len();
        self.deferred_consumers.retain(|e| &e.id != consumer_id);
        pending || self.deferred_consumers.len() != before
    }

    fn handle_new_consumer(&mut self, payload: NewConsumerEvent) {
        let transport = if self.state == SessionState::Ready {
            self.transports.live(TransportDirection::Receive)
        } else {
            None
        };

        let Some(transport) = transport else {
            if self.state == SessionState::Ready
                && self.transports.is_creating(TransportDirection::Receive)
                && self.deferred_consumers.len() < self.deferred_limit
            {
                debug!(
                    target: "media.session.consumers",
                    consumer_id = %payload.id,
                    "Receive transport still being created, deferring consumer"
                );
                self.deferred_consumers.push(payload);
                return;
            }
            warn!(
                target: "media.session.consumers",
                consumer_id = %payload.id,
                session_state = self.state.as_str(),
                "New consumer received without a receive transport, dropping"
            );
            record_event_dropped("no_receive_transport");
            return;
        };

        self.start_consume(transport, payload);
    }

    fn start_consume(&mut self, transport: Arc<dyn MediaTransport>, payload: NewConsumerEvent) {
        let Some(sender) = self.notifier.upgrade() else {
            return;
        };

        let NewConsumerEvent {
            participant_id,
            producer_id,
            id,
            kind,
            rtp_parameters,
            app_data,
            producer_paused,
            ..
        } = payload;

        debug!(
            target: "media.session.consumers",
            consumer_id = %id,
            producer_id = %producer_id,
            participant_id = %participant_id,
            kind = kind.as_str(),
            "Consuming remote producer"
        );

        let attempt = self.next_consume_attempt;
        self.next_consume_attempt += 1;
        self.in_flight_consumers.insert(
            attempt,
            PendingConsume {
                consumer_id: id.clone(),
                cancelled: false,
            },
        );
        let transport_id = transport.id().clone();
        let options = ConsumeOptions {
            id: id.clone(),
            producer_id,
            kind,
            rtp_parameters,
            app_data: with_participant(app_data, &participant_id),
        };

        tokio::spawn(async move {
            let result = transport.consume(options).await;
            let _ = sender
                .send(SessionMessage::ConsumerCreated {
                    attempt,
                    consumer_id: id,
                    participant_id,
                    transport_id,
                    producer_paused,
                    result,
                })
                .await;
        });
    }

    fn handle_consumer_created(
        &mut self,
        attempt: u64,
        consumer_id: ConsumerId,
        participant_id: ParticipantId,
        transport_id: TransportId,
        producer_paused: bool,
        result: Result<Arc<dyn MediaConsumer>, SessionError>,
    ) {
        let cancelled = match self.in_flight_consumers.remove(&attempt) {
            Some(pending) => pending.cancelled,
            None => true,
        };

        let consumer = match result {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(
                    target: "media.session.consumers",
                    consumer_id = %consumer_id,
                    error = %e,
                    "Failed to create consumer"
                );
                return;
            }
        };

        if cancelled
            || self.state != SessionState::Ready
            || !self.transports.is_live(&transport_id)
        {
            debug!(
                target: "media.session.consumers",
                consumer_id = %consumer_id,
                cancelled = cancelled,
                "Consumer completed after teardown, closing it"
            );
            consumer.close();
            return;
        }

        self.consumers.add_or_update_from_remote(
            consumer,
            participant_id,
            transport_id,
            producer_paused,
        );
        set_consumers_active(self.consumers.len());

        info!(
            target: "media.session.consumers",
            consumer_id = %consumer_id,
            consumers = self.consumers.len(),
            "Consumer added"
        );
        self.events.emit(SessionEvent::ConsumersChanged);
    }

    fn replay_deferred_consumers(&mut self) {
        let deferred = std::mem::take(&mut self.deferred_consumers);
        if deferred.is_empty() {
            return;
        }
        let Some(transport) = self.transports.live(TransportDirection::Receive) else {
            return;
        };
        debug!(
            target: "media.session.consumers",
            count = deferred.len(),
            "Replaying deferred consumers"
        );
        for payload in deferred {
            self.start_consume(Arc::clone(&transport), payload);
        }
    }

    fn drop_deferred_consumers(&mut self) {
        for payload in std::mem::take(&mut self.deferred_consumers) {
            warn!(
                target: "media.session.consumers",
                consumer_id = %payload.id,
                "Receive transport creation failed, dropping deferred consumer"
            );
            record_event_dropped("no_receive_transport");
        }
    }

    // --- Layers ---

    fn handle_layer_plan(
        &mut self,
        consumer_id: ConsumerId,
        plan: LayerPlan,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    ) {
        let layers = match plan {
            LayerPlan::UnknownConsumer => {
                debug!(
                    target: "media.session.layers",
                    consumer_id = %consumer_id,
                    "Layer request for unknown consumer ignored"
                );
                record_layer_request(LayerRequestOutcome::UnknownConsumer);
                let _ = respond_to.send(Ok(()));
                return;
            }
            LayerPlan::Unchanged => {
                record_layer_request(LayerRequestOutcome::Suppressed);
                let _ = respond_to.send(Ok(()));
                return;
            }
            LayerPlan::Request(layers) => layers,
        };

        let Some(sender) = self.notifier.upgrade() else {
            let _ = respond_to.send(Err(SessionError::Internal(
                "session mailbox closed".to_string(),
            )));
            return;
        };
        let client = self.client.clone();
        self.layers.begin_request(consumer_id.clone(), layers);

        debug!(
            target: "media.session.layers",
            consumer_id = %consumer_id,
            spatial_layer = layers.spatial_layer,
            temporal_layer = ?layers.temporal_layer,
            "Requesting preferred layers"
        );

        tokio::spawn(async move {
            let request = SetConsumerLayersRequest {
                consumer_id: consumer_id.clone(),
                layers,
            };
            let result = client.set_consumer_layers(&request).await;
            let _ = sender
                .send(SessionMessage::LayerRequestCompleted {
                    consumer_id,
                    layers,
                    result,
                    respond_to,
                })
                .await;
        });
    }

    fn handle_layer_completed(
        &mut self,
        consumer_id: ConsumerId,
        layers: ConsumerLayers,
        result: Result<(), SignalingError>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    ) {
        self.layers.finish_request(&consumer_id, layers);

        match result {
            Ok(()) => {
                record_layer_request(LayerRequestOutcome::Sent);
                if self.consumers.set_preferred_layers(&consumer_id, layers) {
                    self.events.emit(SessionEvent::StatusInfoUpdated {
                        consumer_id: consumer_id.clone(),
                    });
                }
                debug!(
                    target: "media.session.layers",
                    consumer_id = %consumer_id,
                    spatial_layer = layers.spatial_layer,
                    "Preferred layers accepted"
                );
                let _ = respond_to.send(Ok(()));
            }
            Err(e) => {
                record_layer_request(LayerRequestOutcome::Failed);
                warn!(
                    target: "media.session.layers",
                    consumer_id = %consumer_id,
                    error = %e,
                    "Preferred layer request rejected"
                );
                let _ = respond_to.send(Err(SessionError::LayerChange {
                    consumer_id,
                    reason: e.to_string(),
                }));
            }
        }
    }

    // --- Teardown ---

    /// Release everything and move to `closed`. Returns `false` if the
    /// session was already closed (nothing is touched twice).
    fn teardown(&mut self, reason: &'static str) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        let previous = self.state;
        self.state = SessionState::Closed;

        let transports_closed = self.transports.close_all();
        let consumers_removed = self.consumers.clear();
        self.producers.clear();
        self.layers.clear();
        for attempt in self.in_flight_consumers.values_mut() {
            attempt.cancelled = true;
        }
        self.deferred_consumers.clear();

        let subscriptions = std::mem::take(&mut self.subscriptions);
        for subscription in &subscriptions {
            self.client.channel().unsubscribe(subscription);
        }

        set_consumers_active(0);
        if consumers_removed > 0 {
            self.events.emit(SessionEvent::ConsumersChanged);
        }

        info!(
            target: "media.session",
            session_id = %self.session_id,
            reason = reason,
            previous_state = previous.as_str(),
            transports_closed = transports_closed,
            consumers_removed = consumers_removed,
            unsubscribed = subscriptions.len(),
            "Session closed"
        );
        true
    }
}

/// Subscribe a forwarding handler for every inbound event.
fn subscribe_all(
    channel: &Arc<dyn SignalingChannel>,
    notifier: &MailboxNotifier,
) -> Vec<Subscription> {
    event_names::ALL
        .iter()
        .map(|&name| {
            let notifier = notifier.clone();
            let handler: EventHandler =
                Arc::new(move |payload: Value| match SignalingEvent::decode(name, payload) {
                    Ok(event) => {
                        record_signaling_event(event.name());
                        notifier.notify(SessionMessage::Signaling(event));
                    }
                    Err(e) => {
                        warn!(
                            target: "media.session.signaling",
                            event = name,
                            error = %e,
                            "Dropping malformed signaling event"
                        );
                        record_event_dropped("malformed");
                    }
                });
            channel.subscribe(name, handler)
        })
        .collect()
}

/// Add the originating participant to the consumer's application data.
fn with_participant(app_data: Value, participant_id: &ParticipantId) -> Value {
    let mut map = match app_data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert(
        "participantId".to_string(),
        Value::String(participant_id.to_string()),
    );
    Value::Object(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{DeviceCapabilities, TransportListener, TransportParameters};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Channel that rejects every invocation.
    #[derive(Default)]
    struct RejectingChannel {
        subscribed: AtomicUsize,
        unsubscribed: AtomicUsize,
    }

    #[async_trait]
    impl SignalingChannel for RejectingChannel {
        async fn invoke(&self, method: &str, _payload: Value) -> Result<Value, SignalingError> {
            Ok(json!({
                "success": false,
                "error": { "type": "SFU", "message": format!("{method} rejected"), "code": "REJECTED" }
            }))
        }

        fn subscribe(&self, event: &str, _handler: EventHandler) -> Subscription {
            let id = self.subscribed.fetch_add(1, Ordering::SeqCst);
            Subscription::new(event, id as u64)
        }

        fn unsubscribe(&self, _subscription: &Subscription) {
            self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoEngine;

    #[async_trait]
    impl MediaEngine for NoEngine {
        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities::default()
        }

        fn can_produce(&self, _kind: MediaKind) -> bool {
            false
        }

        async fn create_send_transport(
            &self,
            _parameters: TransportParameters,
            _listener: Arc<dyn TransportListener>,
        ) -> Result<Arc<dyn MediaTransport>, SessionError> {
            Err(SessionError::Engine("no engine".to_string()))
        }

        async fn create_recv_transport(
            &self,
            _parameters: TransportParameters,
            _listener: Arc<dyn TransportListener>,
        ) -> Result<Arc<dyn MediaTransport>, SessionError> {
            Err(SessionError::Engine("no engine".to_string()))
        }
    }

    fn spawn_session(channel: Arc<RejectingChannel>) -> (SessionHandle, JoinHandle<()>) {
        SessionOrchestrator::spawn(
            SessionConfig::default(),
            channel,
            Arc::new(NoEngine),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_with_participant_merges_into_object() {
        let participant = ParticipantId::new("alice");
        assert_eq!(
            with_participant(json!({ "source": "webcam" }), &participant),
            json!({ "source": "webcam", "participantId": "alice" })
        );
        assert_eq!(
            with_participant(Value::Null, &participant),
            json!({ "participantId": "alice" })
        );
    }

    #[tokio::test]
    async fn test_rejected_initialize_closes_session() {
        let channel = Arc::new(RejectingChannel::default());
        let (handle, _task) = spawn_session(channel.clone());

        assert_eq!(handle.state().await.unwrap(), SessionState::Uninitialized);
        assert_eq!(
            channel.subscribed.load(Ordering::SeqCst),
            event_names::ALL.len()
        );

        let result = handle.initialize().await;
        assert!(matches!(result, Err(SessionError::InitializationFailed(_))));
        assert_eq!(handle.state().await.unwrap(), SessionState::Closed);
        assert_eq!(
            channel.unsubscribed.load(Ordering::SeqCst),
            event_names::ALL.len()
        );

        assert!(matches!(
            handle.initialize().await,
            Err(SessionError::SessionClosed)
        ));

        handle.close().await;
        assert_eq!(
            channel.unsubscribed.load(Ordering::SeqCst),
            event_names::ALL.len()
        );
    }

    #[tokio::test]
    async fn test_operations_before_initialize_are_rejected() {
        let channel = Arc::new(RejectingChannel::default());
        let (handle, _task) = spawn_session(channel);

        assert!(matches!(
            handle.create_receive_transport().await,
            Err(SessionError::NotReady)
        ));
        assert!(matches!(
            handle
                .produce(ProduceOptions::new(MediaKind::Audio, ProducerSource::Mic))
                .await,
            Err(SessionError::NotReady)
        ));
        assert!(handle.get_consumers().await.unwrap().is_empty());
        assert!(handle.capabilities().await.unwrap().is_none());
        assert!(handle
            .request_layer(ConsumerId::new("c1"), 640)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cancel_stops_actor_and_unsubscribes() {
        let channel = Arc::new(RejectingChannel::default());
        let (handle, task) = spawn_session(channel.clone());

        handle.cancel();
        task.await.unwrap();

        assert!(handle.is_cancelled());
        assert_eq!(
            channel.unsubscribed.load(Ordering::SeqCst),
            event_names::ALL.len()
        );
        assert!(matches!(
            handle.state().await,
            Err(SessionError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_actor() {
        let channel = Arc::new(RejectingChannel::default());
        let (handle, task) = spawn_session(channel.clone());
        drop(handle);

        task.await.unwrap();
        assert_eq!(
            channel.unsubscribed.load(Ordering::SeqCst),
            event_names::ALL.len()
        );
    }

    #[test]
    fn test_failed_operations_are_counted_by_error_type() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        // The local recorder is per-thread, so drive the actor on a
        // current-thread runtime inside it.
        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (handle, task) = spawn_session(Arc::new(RejectingChannel::default()));
                let _ = handle.create_send_transport().await;
                let _ = handle.initialize().await;
                let _ = handle.initialize().await;
                handle.cancel();
                task.await.unwrap();
            });
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let count = |operation: &str, error_type: &str| {
            snapshot.iter().find_map(|(key, _, _, value)| {
                let key = key.key();
                let is_match = key.name() == "media_session_errors_total"
                    && key.labels().any(|l| l.key() == "operation" && l.value() == operation)
                    && key
                        .labels()
                        .any(|l| l.key() == "error_type" && l.value() == error_type);
                match (is_match, value) {
                    (true, DebugValue::Counter(n)) => Some(*n),
                    _ => None,
                }
            })
        };

        assert_eq!(count("create_transport", "not_ready"), Some(1));
        assert_eq!(count("initialize", "initialization_failed"), Some(1));
        assert_eq!(count("initialize", "session_closed"), Some(1));
    }
}
