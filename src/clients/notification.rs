use anyhow::{Error, Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{config::Config, models::notification::NotificationRecord};

const DEFAULT_ERROR_MESSAGE: &str = "unknown error";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("failed to decode notification service response: {0}")]
    InvalidResponse(#[source] serde_json::Error),
}

impl DeliveryError {
    /// Downstream status when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Http { status, .. } => Some(*status),
            DeliveryError::Transport(e) => e.status().map(|s| s.as_u16()),
            DeliveryError::InvalidResponse(_) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Forwards decoded notifications to the downstream notification service.
pub struct NotificationClient {
    http_client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl NotificationClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(config.notification_timeout())
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        let base_url = config.notification_url.trim_end_matches('/').to_string();

        info!(base_url = %base_url, "Notification client initialized");

        Ok(Self {
            http_client,
            base_url,
            username: config.basic_auth_username.clone(),
            password: config.basic_auth_password.clone(),
        })
    }

    pub async fn deliver(&self, record: &NotificationRecord) -> Result<(), DeliveryError> {
        let url = format!("{}/notification", self.base_url);

        debug!(
            user_id = record.user_id,
            channel = %record.channel,
            "Sending notification to delivery service"
        );

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(record)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status.as_u16() >= 400 {
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        if !body.is_empty() {
            let _: serde_json::Value =
                serde_json::from_slice(&body).map_err(DeliveryError::InvalidResponse)?;
        }

        Ok(())
    }
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ServiceErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string())
}
