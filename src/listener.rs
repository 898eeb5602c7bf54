use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    broker::{BrokerError, PubSubClient},
    handlers::HandlerRegistry,
    utils::wait_for_shutdown,
};

#[derive(Debug, Error)]
pub enum ListenError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to process subscription {subscription}")]
    ProcessingFailed { subscription: String },
}

/// Walks the broker's subscriptions and hands each one to its registered
/// handler.
pub struct SubscriptionService {
    client: Arc<dyn PubSubClient>,
    registry: Arc<HandlerRegistry>,
}

impl SubscriptionService {
    pub fn new(client: Arc<dyn PubSubClient>, registry: Arc<HandlerRegistry>) -> Self {
        Self { client, registry }
    }

    /// Returns `Ok(())` once the subscription listing is exhausted or shutdown
    /// is signalled. Listing errors are returned as they are; handler errors
    /// end the run as [`ListenError::ProcessingFailed`].
    pub async fn listen(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ListenError> {
        let mut subscriptions = self.client.subscriptions();

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, subscription listener stopping");
                break;
            }

            let next = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Shutdown requested while listing subscriptions");
                    break;
                }
                next = subscriptions.next() => next,
            };

            let subscription = match next {
                Ok(Some(subscription)) => subscription,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to iterate over subscriptions");
                    return Err(ListenError::Broker(e));
                }
            };

            let subscription_id = subscription.id().to_string();

            let Some(handler) = self.registry.get_handler(&subscription_id) else {
                info!(subscription = %subscription_id, "No handler registered for subscription");
                continue;
            };

            info!(subscription = %subscription_id, "Handler found for subscription");

            if let Err(e) = handler.handle(subscription, shutdown.clone()).await {
                error!(
                    subscription = %subscription_id,
                    error = %e,
                    "Subscription processing failed"
                );
                return Err(ListenError::ProcessingFailed {
                    subscription: subscription_id,
                });
            }
        }

        Ok(())
    }
}
