use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use queue_service::{
    broker::{
        AckReply, BrokerError, Message, MessageCallback, PubSubClient, Subscription,
        SubscriptionIterator, Topic,
    },
    config::Config,
    handlers::SubscribeHandler,
};
use serde_json::{Value, json};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    watch,
};

pub const TEST_USERNAME: &str = "user";
pub const TEST_PASSWORD: &str = "pass";
/// base64("user:pass")
pub const TEST_AUTH_HEADER: &str = "Basic dXNlcjpwYXNz";

pub fn test_config(notification_url: &str, overrides: &[(&str, &str)]) -> Config {
    let mut vars: Vec<(String, String)> = vec![
        ("ENVIRONMENT", "prod"),
        ("BASIC_AUTH_USERNAME", TEST_USERNAME),
        ("BASIC_AUTH_PASSWORD", TEST_PASSWORD),
        ("PROJECT_ID", "test-project"),
        ("NOTIFICATION_URL", notification_url),
        ("EMPTY_PULL_DELAY_MS", "20"),
        ("MAX_RETRY_ATTEMPTS", "2"),
        ("INITIAL_RETRY_DELAY_MS", "10"),
        ("MAX_RETRY_DELAY_MS", "20"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (key, value) in overrides {
        vars.retain(|(k, _)| k != key);
        vars.push((key.to_string(), value.to_string()));
    }

    Config::from_vars(vars).expect("test configuration should be valid")
}

pub fn envelope(data: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "data": data })).expect("envelope serializes")
}

pub fn email_notification() -> Value {
    json!({
        "userId": 1,
        "userName": "Ana",
        "channel": "EMAIL",
        "subject": "Welcome",
        "recipient": "a@b.com",
        "payload": { "html": "<b>hi</b>" }
    })
}

pub fn drain_replies(replies: &mut UnboundedReceiver<AckReply>) -> Vec<AckReply> {
    let mut drained = Vec::new();
    while let Ok(reply) = replies.try_recv() {
        drained.push(reply);
    }
    drained
}

/// Replays a fixed list of payloads to the callback, then returns.
pub struct FakeSubscription {
    id: String,
    payloads: Mutex<Vec<Vec<u8>>>,
    replies: UnboundedSender<AckReply>,
    receive_error: Option<(u16, String)>,
}

impl FakeSubscription {
    pub fn new(
        id: &str,
        payloads: Vec<Vec<u8>>,
    ) -> (Arc<Self>, UnboundedReceiver<AckReply>) {
        let (replies, rx) = mpsc::unbounded_channel();
        let subscription = Self {
            id: id.to_string(),
            payloads: Mutex::new(payloads),
            replies,
            receive_error: None,
        };
        (Arc::new(subscription), rx)
    }

    pub fn failing(id: &str, status: u16, message: &str) -> Arc<Self> {
        let (replies, _rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: id.to_string(),
            payloads: Mutex::new(Vec::new()),
            replies,
            receive_error: Some((status, message.to_string())),
        })
    }
}

#[async_trait]
impl Subscription for FakeSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn receive(
        &self,
        _shutdown: watch::Receiver<bool>,
        callback: MessageCallback,
    ) -> Result<(), BrokerError> {
        if let Some((status, message)) = &self.receive_error {
            return Err(BrokerError::Api {
                status: *status,
                message: message.clone(),
            });
        }

        let payloads = std::mem::take(&mut *self.payloads.lock().unwrap());

        for (index, payload) in payloads.into_iter().enumerate() {
            let message = Message::new(
                format!("msg-{}", index),
                format!("ack-{}", index),
                payload,
                self.replies.clone(),
            );
            callback(message).await;
        }

        Ok(())
    }
}

#[derive(Clone)]
pub enum Listing {
    Subscription(Arc<dyn Subscription>),
    Failure(u16, String),
    /// The listing call never completes.
    Stall,
}

pub fn idle_subscription(id: &str) -> Listing {
    let (subscription, _replies) = FakeSubscription::new(id, Vec::new());
    Listing::Subscription(subscription)
}

struct FakeIterator {
    items: VecDeque<Listing>,
}

#[async_trait]
impl SubscriptionIterator for FakeIterator {
    async fn next(&mut self) -> Result<Option<Arc<dyn Subscription>>, BrokerError> {
        match self.items.pop_front() {
            None => Ok(None),
            Some(Listing::Subscription(subscription)) => Ok(Some(subscription)),
            Some(Listing::Failure(status, message)) => Err(BrokerError::Api { status, message }),
            Some(Listing::Stall) => std::future::pending().await,
        }
    }
}

struct FakeTopic {
    id: String,
    fail: bool,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl Topic for FakeTopic {
    fn id(&self) -> &str {
        &self.id
    }

    async fn publish(&self, data: Vec<u8>) -> Result<String, BrokerError> {
        if self.fail {
            return Err(BrokerError::Api {
                status: 404,
                message: format!("Resource not found (resource={})", self.id),
            });
        }

        let mut published = self.published.lock().unwrap();
        published.push((self.id.clone(), data));
        Ok(format!("id-{}-{}", self.id, published.len()))
    }
}

#[derive(Default)]
pub struct FakePubSubClient {
    listing: Vec<Listing>,
    failing_topics: Vec<String>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl FakePubSubClient {
    pub fn with_listing(listing: Vec<Listing>) -> Self {
        Self {
            listing,
            ..Default::default()
        }
    }

    pub fn with_failing_topic(mut self, topic: &str) -> Self {
        self.failing_topics.push(topic.to_string());
        self
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

impl PubSubClient for FakePubSubClient {
    fn subscriptions(&self) -> Box<dyn SubscriptionIterator> {
        Box::new(FakeIterator {
            items: self.listing.iter().cloned().collect(),
        })
    }

    fn topic(&self, id: &str) -> Arc<dyn Topic> {
        Arc::new(FakeTopic {
            id: id.to_string(),
            fail: self.failing_topics.iter().any(|topic| topic == id),
            published: Arc::clone(&self.published),
        })
    }
}

/// Records which subscriptions it was asked to handle.
#[derive(Default)]
pub struct RecordingHandler {
    handled: Mutex<Vec<String>>,
    error: Option<String>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            handled: Mutex::new(Vec::new()),
            error: Some(message.to_string()),
        })
    }

    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscribeHandler for RecordingHandler {
    async fn handle(
        &self,
        subscription: Arc<dyn Subscription>,
        _shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.handled
            .lock()
            .unwrap()
            .push(subscription.id().to_string());

        match &self.error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}
