//! Capability surface over the publish/subscribe broker.
//!
//! The listener and handlers only talk to these traits, so the concrete SDK
//! (see [`crate::clients::pubsub`]) can be swapped for a double in tests.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::warn;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker authentication failed: {0}")]
    Auth(#[from] gcp_auth::Error),

    #[error("broker returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid broker response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Terminal decision for one received message, sent back to whoever leased it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckReply {
    pub ack_id: String,
    pub disposition: Disposition,
}

/// A message leased from a subscription.
///
/// `ack` and `nack` consume the message, so at most one decision can be made.
/// A message dropped without a decision is nacked.
#[derive(Debug)]
pub struct Message {
    pub id: String,
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    pub publish_time: Option<DateTime<Utc>>,
    ack_id: String,
    replies: Option<UnboundedSender<AckReply>>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        ack_id: impl Into<String>,
        data: Vec<u8>,
        replies: UnboundedSender<AckReply>,
    ) -> Self {
        Self {
            id: id.into(),
            data,
            attributes: HashMap::new(),
            publish_time: None,
            ack_id: ack_id.into(),
            replies: Some(replies),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_publish_time(mut self, publish_time: Option<DateTime<Utc>>) -> Self {
        self.publish_time = publish_time;
        self
    }

    pub fn ack_id(&self) -> &str {
        &self.ack_id
    }

    pub fn ack(mut self) {
        self.settle(Disposition::Ack);
    }

    pub fn nack(mut self) {
        self.settle(Disposition::Nack);
    }

    fn settle(&mut self, disposition: Disposition) {
        let Some(replies) = self.replies.take() else {
            return;
        };

        let reply = AckReply {
            ack_id: self.ack_id.clone(),
            disposition,
        };

        if replies.send(reply).is_err() {
            warn!(
                message_id = %self.id,
                ?disposition,
                "Receive loop already closed, decision dropped"
            );
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if self.replies.is_some() {
            warn!(message_id = %self.id, "Message dropped without a decision, requesting redelivery");
            self.settle(Disposition::Nack);
        }
    }
}

pub type MessageCallback = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Subscription: Send + Sync {
    fn id(&self) -> &str;

    /// Delivers messages to `callback` until `shutdown` flips to `true` or a
    /// fatal error occurs. Callbacks may run concurrently. Returns only after
    /// every in-flight callback has finished.
    async fn receive(
        &self,
        shutdown: watch::Receiver<bool>,
        callback: MessageCallback,
    ) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait SubscriptionIterator: Send {
    /// `Ok(None)` marks the end of the listing.
    async fn next(&mut self) -> Result<Option<Arc<dyn Subscription>>, BrokerError>;
}

#[async_trait]
pub trait Topic: Send + Sync {
    fn id(&self) -> &str;

    /// Publishes `data` and waits for the broker-assigned message id.
    async fn publish(&self, data: Vec<u8>) -> Result<String, BrokerError>;
}

pub trait PubSubClient: Send + Sync {
    fn subscriptions(&self) -> Box<dyn SubscriptionIterator>;

    fn topic(&self, id: &str) -> Arc<dyn Topic>;
}
