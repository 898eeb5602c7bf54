//! Subscription handlers and the routing table that selects them.

pub mod notification;

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::{
    broker::Subscription,
    clients::notification::NotificationClient,
    config::Config,
    handlers::notification::NotificationHandler,
    models::topic::{Environment, SubscriptionTopic},
};

#[async_trait]
pub trait SubscribeHandler: Send + Sync {
    /// Consumes `subscription` until `shutdown` is signalled. An error means
    /// the subscription could not be processed at all; per-message failures
    /// never surface here.
    async fn handle(
        &self,
        subscription: Arc<dyn Subscription>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// Immutable map from subscription id to the handler that consumes it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn SubscribeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        mut self,
        topic_id: impl Into<String>,
        handler: Arc<dyn SubscribeHandler>,
    ) -> Self {
        self.handlers.insert(topic_id.into(), handler);
        self
    }

    /// The deployment environment decides which subscriptions are consumed.
    pub fn from_config(config: &Config, client: Arc<NotificationClient>) -> Self {
        let environment = config.environment();

        let topic = match environment {
            Environment::Production => Some(SubscriptionTopic::Notification),
            Environment::Homologation => Some(SubscriptionTopic::HmlNotification),
            Environment::Other(_) => None,
        };

        let registry = match topic {
            Some(topic) => Self::new().with_handler(
                topic.as_str(),
                Arc::new(NotificationHandler::new(client)) as Arc<dyn SubscribeHandler>,
            ),
            None => Self::new(),
        };

        info!(
            environment = environment.as_str(),
            handlers = registry.len(),
            "Subscription handlers registered"
        );

        registry
    }

    pub fn get_handler(&self, topic_id: &str) -> Option<Arc<dyn SubscribeHandler>> {
        self.handlers.get(topic_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
