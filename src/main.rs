use std::sync::Arc;

use anyhow::{Error, Result};
use queue_service::{
    api::{AppState, BasicAuthCredentials, run_api_server},
    broker::PubSubClient,
    clients::{notification::NotificationClient, pubsub::PubSubRestClient},
    config::Config,
    handlers::HandlerRegistry,
    listener::SubscriptionService,
    publisher::PublishService,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let pubsub: Arc<dyn PubSubClient> = Arc::new(PubSubRestClient::connect(&config).await?);
    let notification_client = Arc::new(NotificationClient::new(&config)?);
    let registry = Arc::new(HandlerRegistry::from_config(&config, notification_client));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let listener = SubscriptionService::new(Arc::clone(&pubsub), registry);
    let listener_shutdown = Arc::clone(&shutdown_tx);
    let listener_rx = shutdown_rx.clone();
    let listener_task = tokio::spawn(async move {
        let result = listener.listen(listener_rx).await;
        match &result {
            Ok(()) => info!("Subscription listener finished"),
            Err(e) => {
                error!(error = %e, "Subscription listener failed, shutting down");
                let _ = listener_shutdown.send(true);
            }
        }
        result
    });

    let signal_shutdown = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        let _ = signal_shutdown.send(true);
    });

    let state = Arc::new(AppState::new(
        PublishService::new(pubsub),
        BasicAuthCredentials::from_config(&config),
    ));

    run_api_server(&config, state, shutdown_rx).await?;

    let _ = shutdown_tx.send(true);
    listener_task.await??;

    Ok(())
}
