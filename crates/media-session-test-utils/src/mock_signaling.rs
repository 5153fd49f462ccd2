//! Mock signaling channel for media session testing.
//!
//! Answers every invocation with the server envelope
//! (`{ success, response | error }`), records what was invoked, and lets
//! tests push server events into the subscribed handlers.
//!
//! # Example
//!
//! ```rust,ignore
//! use media_session_test_utils::{MockReply, MockSignaling};
//!
//! let signaling = MockSignaling::builder()
//!     .reply("InitializeConnection", MockReply::reject("INIT", "bad capabilities"))
//!     .build();
//!
//! // Hand `signaling.clone()` to the session, then:
//! signaling.emit("consumerClosed", json!({ "consumerId": "c1" }));
//! assert_eq!(signaling.unsubscribe_count(), 7);
//! ```

use async_trait::async_trait;
use media_session::signaling::{methods, EventHandler, SignalingChannel, Subscription};
use media_session::SignalingError;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// `{ success: true, response: <value> }`
    Success(Value),
    /// `{ success: false, error: { code, message } }`
    Reject { code: String, message: String },
    /// Channel-level failure.
    Disconnect(String),
    /// Raw value returned as-is (for malformed responses).
    Raw(Value),
}

impl MockReply {
    #[must_use]
    pub fn reject(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reject {
            code: code.into(),
            message: message.into(),
        }
    }

    fn into_result(self) -> Result<Value, SignalingError> {
        match self {
            MockReply::Success(response) => Ok(json!({ "success": true, "response": response })),
            MockReply::Reject { code, message } => Ok(json!({
                "success": false,
                "error": { "type": "SFU", "message": message, "code": code }
            })),
            MockReply::Disconnect(reason) => Err(SignalingError::Disconnected(reason)),
            MockReply::Raw(value) => Ok(value),
        }
    }
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub method: String,
    pub payload: Value,
}

/// Mock signaling channel.
#[derive(Default)]
pub struct MockSignaling {
    handlers: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_subscription: AtomicU64,
    unsubscribe_calls: AtomicUsize,
    invocations: Mutex<Vec<Invocation>>,
    queued: Mutex<HashMap<String, VecDeque<MockReply>>>,
    replies: HashMap<String, MockReply>,
    delays: HashMap<String, Duration>,
    transport_counter: AtomicUsize,
    producer_counter: AtomicUsize,
}

impl MockSignaling {
    /// Mock that accepts everything.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn builder() -> MockSignalingBuilder {
        MockSignalingBuilder::default()
    }

    /// Queue a one-shot reply for the next invocation of `method`.
    pub fn push_reply(&self, method: &str, reply: MockReply) {
        self.queued
            .lock()
            .expect("queued lock poisoned")
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Deliver a server event to every handler subscribed to it.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .expect("handlers lock poisoned")
            .get(event)
            .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(payload.clone());
        }
        handlers.len()
    }

    /// All invocations in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .expect("invocations lock poisoned")
            .clone()
    }

    /// Payloads sent to one method, in order.
    #[must_use]
    pub fn payloads(&self, method: &str) -> Vec<Value> {
        self.invocations()
            .into_iter()
            .filter(|i| i.method == method)
            .map(|i| i.payload)
            .collect()
    }

    #[must_use]
    pub fn invocation_count(&self, method: &str) -> usize {
        self.payloads(method).len()
    }

    /// Number of `unsubscribe` calls received.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of handlers currently subscribed.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.handlers
            .lock()
            .expect("handlers lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    fn next_reply(&self, method: &str, payload: &Value) -> MockReply {
        let queued = self
            .queued
            .lock()
            .expect("queued lock poisoned")
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }
        if let Some(reply) = self.replies.get(method) {
            return reply.clone();
        }
        self.default_reply(method, payload)
    }

    fn default_reply(&self, method: &str, payload: &Value) -> MockReply {
        match method {
            methods::CREATE_TRANSPORT => {
                let n = self.transport_counter.fetch_add(1, Ordering::SeqCst) + 1;
                let prefix = if payload["producing"] == json!(true) {
                    "send"
                } else {
                    "recv"
                };
                MockReply::Success(json!({
                    "id": format!("{prefix}-transport-{n}"),
                    "iceParameters": { "usernameFragment": "mock", "password": "mock" },
                    "iceCandidates": [],
                    "dtlsParameters": { "role": "auto", "fingerprints": [] }
                }))
            }
            methods::TRANSPORT_PRODUCE => {
                let n = self.producer_counter.fetch_add(1, Ordering::SeqCst) + 1;
                MockReply::Success(json!({ "id": format!("producer-{n}") }))
            }
            methods::INITIALIZE_CONNECTION => MockReply::Success(json!({})),
            _ => MockReply::Success(Value::Null),
        }
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn invoke(&self, method: &str, payload: Value) -> Result<Value, SignalingError> {
        tracing::debug!(target: "media.session.test", method, "Mock signaling invoked");
        self.invocations
            .lock()
            .expect("invocations lock poisoned")
            .push(Invocation {
                method: method.to_string(),
                payload: payload.clone(),
            });

        if let Some(delay) = self.delays.get(method) {
            tokio::time::sleep(*delay).await;
        }

        self.next_reply(method, &payload).into_result()
    }

    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .expect("handlers lock poisoned")
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        Subscription::new(event, id)
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(subs) = self
            .handlers
            .lock()
            .expect("handlers lock poisoned")
            .get_mut(subscription.event())
        {
            subs.retain(|(id, _)| *id != subscription.id());
        }
    }
}

/// Builder for [`MockSignaling`].
#[derive(Debug, Default)]
pub struct MockSignalingBuilder {
    replies: HashMap<String, MockReply>,
    delays: HashMap<String, Duration>,
}

impl MockSignalingBuilder {
    /// Answer every invocation of `method` with `reply`.
    #[must_use]
    pub fn reply(mut self, method: &str, reply: MockReply) -> Self {
        self.replies.insert(method.to_string(), reply);
        self
    }

    /// Reject every invocation of `method`.
    #[must_use]
    pub fn reject(self, method: &str, message: &str) -> Self {
        self.reply(method, MockReply::reject("MOCK_REJECTED", message))
    }

    /// Fail every invocation of `method` at the channel level.
    #[must_use]
    pub fn disconnect(self, method: &str) -> Self {
        self.reply(method, MockReply::Disconnect("mock disconnected".to_string()))
    }

    /// Delay replies to `method` (use with paused time).
    #[must_use]
    pub fn delay(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockSignaling> {
        Arc::new(MockSignaling {
            replies: self.replies,
            delays: self.delays,
            ..MockSignaling::default()
        })
    }
}
