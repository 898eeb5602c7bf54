use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tracing::info;

use crate::{broker::PubSubClient, models::publish::PublishRequest};

pub struct PublishService {
    client: Arc<dyn PubSubClient>,
}

impl PublishService {
    pub fn new(client: Arc<dyn PubSubClient>) -> Self {
        Self { client }
    }

    /// Publishes the whole request to `meta.topic` and waits for the message id.
    pub async fn publish(&self, request: &PublishRequest) -> Result<String, Error> {
        let data = serde_json::to_vec(request)?;

        let message_id = self
            .client
            .topic(&request.meta.topic)
            .publish(data)
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?;

        info!(
            topic = %request.meta.topic,
            message_id = %message_id,
            "Message published successfully"
        );

        Ok(message_id)
    }
}
