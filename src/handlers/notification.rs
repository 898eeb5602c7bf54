use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    broker::{Disposition, Message, MessageCallback, Subscription},
    clients::notification::NotificationClient,
    decoder::decode_notification,
    handlers::SubscribeHandler,
};

/// Decodes notification messages and forwards them to the delivery service.
pub struct NotificationHandler {
    client: Arc<NotificationClient>,
}

impl NotificationHandler {
    pub fn new(client: Arc<NotificationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubscribeHandler for NotificationHandler {
    async fn handle(
        &self,
        subscription: Arc<dyn Subscription>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let client = Arc::clone(&self.client);

        let callback: MessageCallback = Arc::new(move |message: Message| {
            let client = Arc::clone(&client);
            async move {
                process_message(&client, message).await;
            }
            .boxed()
        });

        subscription
            .receive(shutdown, callback)
            .await
            .map_err(|e| anyhow!("Failed to receive from {}: {}", subscription.id(), e))
    }
}

/// Settles one message: ack when it decodes and is delivered, nack otherwise.
pub async fn process_message(client: &NotificationClient, message: Message) -> Disposition {
    let record = match decode_notification(&message.data) {
        Ok(record) => record,
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "Invalid notification message");
            message.nack();
            return Disposition::Nack;
        }
    };

    if let Err(e) = client.deliver(&record).await {
        warn!(
            message_id = %message.id,
            user_id = record.user_id,
            channel = %record.channel,
            status = ?e.status(),
            error = %e,
            "Notification delivery failed"
        );
        message.nack();
        return Disposition::Nack;
    }

    info!(
        message_id = %message.id,
        user_id = record.user_id,
        channel = %record.channel,
        "Notification delivered"
    );
    message.ack();
    Disposition::Ack
}
