use std::fmt::{Display, Formatter, Result};

/// Subscriptions this service knows how to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTopic {
    Notification,
    HmlNotification,
}

impl SubscriptionTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTopic::Notification => "notifications-sub",
            SubscriptionTopic::HmlNotification => "hml-notifications-sub",
        }
    }
}

impl Display for SubscriptionTopic {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Production,
    Homologation,
    Other(String),
}

impl Environment {
    pub fn from_string(s: &str) -> Self {
        match s.trim() {
            "prod" => Environment::Production,
            "hml" => Environment::Homologation,
            other => Environment::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Environment::Production => "prod",
            Environment::Homologation => "hml",
            Environment::Other(name) => name,
        }
    }
}
