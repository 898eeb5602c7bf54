use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{retry::RetryConfig, topic::Environment};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub environment: String,
    #[serde(default = "default_port")]
    pub port: u16,

    pub basic_auth_username: String,
    pub basic_auth_password: String,

    pub project_id: String,
    #[serde(default = "default_pubsub_endpoint")]
    pub pubsub_endpoint: String,
    pub pubsub_emulator_host: Option<String>,
    #[serde(default = "default_pull_max_messages")]
    pub pull_max_messages: u32,
    #[serde(default = "default_max_outstanding_messages")]
    pub max_outstanding_messages: usize,
    #[serde(default = "default_empty_pull_delay_ms")]
    pub empty_pull_delay_ms: u64,
    #[serde(default = "default_ack_deadline_seconds")]
    pub ack_deadline_seconds: u32,

    pub notification_url: String,
    #[serde(default = "default_notification_timeout_seconds")]
    pub notification_timeout_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,
}

fn default_port() -> u16 {
    3003
}

fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_pull_max_messages() -> u32 {
    100
}

fn default_max_outstanding_messages() -> usize {
    10
}

fn default_empty_pull_delay_ms() -> u64 {
    1000
}

fn default_ack_deadline_seconds() -> u32 {
    60
}

fn default_notification_timeout_seconds() -> u64 {
    10
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        if dotenv().is_err() {
            tracing::debug!("No .env file found, using process environment");
        }

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    /// Builds a configuration from explicit `(NAME, value)` pairs instead of
    /// the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))
    }

    pub fn environment(&self) -> Environment {
        Environment::from_string(&self.environment)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_seconds)
    }

    pub fn empty_pull_delay(&self) -> Duration {
        Duration::from_millis(self.empty_pull_delay_ms)
    }
}
