//! Consumer registry tests driven by server events.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::time::Duration;

use media_session::consumers::ConsumerStatus;
use media_session::engine::{MediaConsumer, MediaTransport};
use media_session::producers::ProducerStatus;
use media_session::types::{
    ConnectionState, ConsumerId, ConsumerLayers, MediaKind, ProducerId, ProducerSource,
    StreamAction, TransportDirection,
};
use media_session::SessionEvent;
use media_session_test_utils::{fixtures, MockMediaEngine, MockSignaling, TestSession};
use serde_json::json;

/// Round-trip through the mailbox so every event emitted before it has
/// been handled.
async fn settle(session: &TestSession) {
    session.handle.state().await.unwrap();
}

// ============================================================================
// newConsumer / consumerClosed
// ============================================================================

#[tokio::test]
async fn test_new_consumer_is_registered_with_participant() {
    let mut session = TestSession::ready().await;

    let id = session
        .add_consumer(fixtures::new_consumer("c1", "alice", "p1", "video"))
        .await;

    let snapshot = session.handle.get_consumer(id.clone()).await.unwrap().unwrap();
    assert_eq!(snapshot.producer_id, ProducerId::new("p1"));
    assert_eq!(snapshot.participant_id.as_str(), "alice");
    assert_eq!(snapshot.kind, MediaKind::Video);
    assert_eq!(snapshot.status, ConsumerStatus::Active);
    assert_eq!(snapshot.transport_id.as_str(), "recv-transport-2");
    assert_eq!(snapshot.app_data["participantId"], json!("alice"));
    assert_eq!(snapshot.app_data["source"], json!("webcam"));

    session
        .expect_event(|e| *e == SessionEvent::ConsumersChanged)
        .await;

    let info = session.handle.get_consumer_info(id).await.unwrap().unwrap();
    assert_eq!(info.score, None);
    assert_eq!(info.current_layers, None);
    assert_eq!(info.preferred_layers, None);

    // The receive transport connected on first consume.
    let receive = session.engine.transport(TransportDirection::Receive).unwrap();
    assert_eq!(receive.connect_calls(), 1);
    assert_eq!(
        session.signaling.payloads("connectTransport")[0]["transportId"],
        json!("recv-transport-2")
    );

    session.shutdown().await;
}

#[tokio::test]
async fn test_consumers_listed_in_arrival_order() {
    let mut session = TestSession::ready().await;

    for (id, participant) in [("c3", "carol"), ("c1", "alice"), ("c2", "bob")] {
        session
            .add_consumer(fixtures::new_audio_consumer(id, participant))
            .await;
    }

    let ids: Vec<String> = session
        .handle
        .get_consumers()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(ids, vec!["c3", "c1", "c2"]);

    session.shutdown().await;
}

#[tokio::test]
async fn test_consumer_closed_removes_consumer_and_info() {
    let mut session = TestSession::ready().await;
    let id = session
        .add_consumer(fixtures::new_video_consumer("c1", "alice"))
        .await;
    session.emit("consumerScore", fixtures::consumer_score("c1", 9, 10));
    settle(&session).await;
    session.drain_events();

    session.emit("consumerClosed", fixtures::consumer_ref("c1"));

    assert_eq!(
        session.expect_event(|_| true).await,
        SessionEvent::ConsumerUpdated {
            consumer_id: id.clone()
        }
    );
    assert_eq!(
        session.expect_event(|_| true).await,
        SessionEvent::ConsumersChanged
    );
    assert!(session.handle.get_consumer(id.clone()).await.unwrap().is_none());
    assert!(session.handle.get_consumer_info(id).await.unwrap().is_none());

    let receive = session.engine.transport(TransportDirection::Receive).unwrap();
    assert!(receive.consumer("c1").unwrap().is_closed());

    session.shutdown().await;
}

#[tokio::test]
async fn test_new_consumer_before_initialize_is_dropped() {
    let session = TestSession::start();

    session.emit("newConsumer", fixtures::new_video_consumer("c1", "alice"));
    session.handle.initialize().await.unwrap();
    settle(&session).await;

    assert!(session.handle.get_consumers().await.unwrap().is_empty());
    let receive = session.engine.transport(TransportDirection::Receive).unwrap();
    assert!(receive.consumers().is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_new_consumer_while_receive_transport_is_being_created() {
    let signaling = MockSignaling::builder()
        .delay("createTransport", Duration::from_millis(150))
        .build();
    let session = TestSession::with_mocks(signaling, MockMediaEngine::new());

    let handle = session.handle.clone();
    let initialize = tokio::spawn(async move { handle.initialize().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while session.handle.state().await.unwrap() != media_session::SessionState::Ready {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    session.emit("newConsumer", fixtures::new_video_consumer("c1", "alice"));

    initialize.await.unwrap().unwrap();
    session.wait_for_consumer(&ConsumerId::new("c1")).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_failed_consume_is_not_registered() {
    let mut session = TestSession::with_mocks(
        MockSignaling::new(),
        MockMediaEngine::builder().fail_consume().build(),
    );
    session.handle.initialize().await.unwrap();

    session.emit("newConsumer", fixtures::new_video_consumer("c1", "alice"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.handle.get_consumers().await.unwrap().is_empty());

    // Later consumers are unaffected.
    session.engine.set_fail_consume(false);
    session
        .add_consumer(fixtures::new_video_consumer("c2", "bob"))
        .await;
    assert_eq!(session.handle.get_consumers().await.unwrap().len(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_consume_closed_by_server_is_not_registered() {
    let session = TestSession::ready().await;
    let id = ConsumerId::new("c1");
    session.engine.set_consume_delay(Duration::from_millis(100));

    session.emit("newConsumer", fixtures::new_video_consumer("c1", "alice"));
    settle(&session).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.emit("newConsumer", fixtures::new_video_consumer("c1", "alice"));
    settle(&session).await;

    // First attempt lands; the duplicate is still in flight.
    tokio::time::sleep(Duration::from_millis(60)).await;
    settle(&session).await;
    assert!(session.handle.get_consumer(id.clone()).await.unwrap().is_some());

    session.emit("consumerClosed", fixtures::consumer_ref("c1"));
    settle(&session).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle(&session).await;

    assert!(session.handle.get_consumer(id).await.unwrap().is_none());
    let receive = session.engine.transport(TransportDirection::Receive).unwrap();
    let created = receive.consumers();
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|c| c.is_closed()));

    session.shutdown().await;
}

// ============================================================================
// Pause / resume / telemetry
// ============================================================================

#[tokio::test]
async fn test_pause_clears_telemetry_and_resume_restores_status() {
    let mut session = TestSession::ready().await;
    let id = session
        .add_consumer(fixtures::new_video_consumer("c1", "alice"))
        .await;
    session.emit("consumerScore", fixtures::consumer_score("c1", 7, 8));
    session.emit("layersChanged", fixtures::layers_changed("c1", Some(2), Some(1)));
    settle(&session).await;

    let info = session
        .handle
        .get_consumer_info(id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.score.unwrap().score, 7);
    assert_eq!(
        info.current_layers,
        Some(ConsumerLayers {
            spatial_layer: 2,
            temporal_layer: Some(1),
        })
    );
    session.drain_events();

    session.emit("consumerPaused", fixtures::consumer_ref("c1"));
    assert_eq!(
        session.expect_event(|_| true).await,
        SessionEvent::ConsumerUpdated {
            consumer_id: id.clone()
        }
    );
    assert_eq!(
        session.expect_event(|_| true).await,
        SessionEvent::StatusInfoUpdated {
            consumer_id: id.clone()
        }
    );

    let snapshot = session.handle.get_consumer(id.clone()).await.unwrap().unwrap();
    assert_eq!(snapshot.status, ConsumerStatus::Paused);
    let info = session
        .handle
        .get_consumer_info(id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.score, None);
    assert_eq!(info.current_layers, None);

    let receive = session.engine.transport(TransportDirection::Receive).unwrap();
    assert!(receive.consumer("c1").unwrap().is_paused());

    session.emit("consumerResumed", fixtures::consumer_ref("c1"));
    settle(&session).await;
    let snapshot = session.handle.get_consumer(id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, ConsumerStatus::Active);
    assert!(!receive.consumer("c1").unwrap().is_paused());

    session.shutdown().await;
}

#[tokio::test]
async fn test_layers_changed_does_not_touch_status() {
    let mut session = TestSession::ready().await;
    let id = session
        .add_consumer(fixtures::new_video_consumer("c1", "alice"))
        .await;
    session.emit("consumerPaused", fixtures::consumer_ref("c1"));

    session.emit("layersChanged", fixtures::layers_changed("c1", Some(1), None));
    settle(&session).await;

    let snapshot = session.handle.get_consumer(id.clone()).await.unwrap().unwrap();
    assert_eq!(snapshot.status, ConsumerStatus::Paused);
    let info = session
        .handle
        .get_consumer_info(id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.current_layers, Some(ConsumerLayers::spatial(1)));

    // A null layer report clears the current layers.
    session.emit("layersChanged", fixtures::layers_changed("c1", None, None));
    settle(&session).await;
    let info = session.handle.get_consumer_info(id).await.unwrap().unwrap();
    assert_eq!(info.current_layers, None);

    session.shutdown().await;
}

#[tokio::test]
async fn test_events_for_unknown_consumers_are_ignored() {
    let mut session = TestSession::ready().await;
    session
        .add_consumer(fixtures::new_video_consumer("c1", "alice"))
        .await;
    settle(&session).await;
    session.drain_events();

    session.emit("consumerClosed", fixtures::consumer_ref("ghost"));
    session.emit("consumerPaused", fixtures::consumer_ref("ghost"));
    session.emit("consumerResumed", fixtures::consumer_ref("ghost"));
    session.emit("consumerScore", fixtures::consumer_score("ghost", 5, 5));
    session.emit("layersChanged", fixtures::layers_changed("ghost", Some(0), None));
    settle(&session).await;

    assert!(session.drain_events().is_empty());
    let consumers = session.handle.get_consumers().await.unwrap();
    assert_eq!(consumers.len(), 1);
    assert_eq!(consumers[0].status, ConsumerStatus::Active);

    session.shutdown().await;
}

#[tokio::test]
async fn test_malformed_event_payload_is_ignored() {
    let mut session = TestSession::ready().await;
    session
        .add_consumer(fixtures::new_video_consumer("c1", "alice"))
        .await;

    session.emit("consumerPaused", json!({ "id": "c1" }));
    session.emit("newConsumer", json!({ "id": "c2" }));
    settle(&session).await;

    let consumers = session.handle.get_consumers().await.unwrap();
    assert_eq!(consumers.len(), 1);
    assert_eq!(consumers[0].status, ConsumerStatus::Active);

    session.shutdown().await;
}

// ============================================================================
// Transport closure
// ============================================================================

#[tokio::test]
async fn test_receive_transport_close_removes_its_consumers() {
    let mut session = TestSession::ready().await;
    session
        .add_consumer(fixtures::new_video_consumer("c1", "alice"))
        .await;
    session
        .add_consumer(fixtures::new_audio_consumer("c2", "alice"))
        .await;
    settle(&session).await;
    session.drain_events();

    let receive = session.engine.transport(TransportDirection::Receive).unwrap();
    receive.simulate_close();

    session
        .expect_event(|e| *e == SessionEvent::ConsumersChanged)
        .await;
    assert!(session.handle.get_consumers().await.unwrap().is_empty());
    assert_eq!(
        session
            .handle
            .transport_state(TransportDirection::Receive)
            .await
            .unwrap(),
        Some(ConnectionState::Closed)
    );
    assert!(receive.is_closed());

    // A replacement receive transport can be created and used.
    let replacement = session.handle.create_receive_transport().await.unwrap();
    assert_eq!(replacement.as_str(), "recv-transport-3");
    let id = session
        .add_consumer(fixtures::new_video_consumer("c3", "bob"))
        .await;
    let snapshot = session.handle.get_consumer(id).await.unwrap().unwrap();
    assert_eq!(snapshot.transport_id, replacement);

    session.shutdown().await;
}

// ============================================================================
// producerChanged
// ============================================================================

#[tokio::test]
async fn test_producer_changed_is_tracked_and_published() {
    let mut session = TestSession::ready().await;

    session.emit(
        "producerChanged",
        fixtures::producer_changed("webcam", "pause", "p9"),
    );

    assert_eq!(
        session.expect_event(|_| true).await,
        SessionEvent::ProducerChanged {
            source: ProducerSource::Webcam,
            action: StreamAction::Pause,
            producer_id: ProducerId::new("p9"),
        }
    );
    let state = session
        .handle
        .get_producer_state(ProducerSource::Webcam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.producer_id, ProducerId::new("p9"));
    assert_eq!(state.status, ProducerStatus::Paused);
    assert!(session
        .handle
        .get_producer_state(ProducerSource::Mic)
        .await
        .unwrap()
        .is_none());

    session.emit(
        "producerChanged",
        fixtures::producer_changed("webcam", "close", "p9"),
    );
    settle(&session).await;
    let state = session
        .handle
        .get_producer_state(ProducerSource::Webcam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, ProducerStatus::Closed);

    session.shutdown().await;
}
