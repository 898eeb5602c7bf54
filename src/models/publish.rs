use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default)]
    pub topic: String,
}

/// Body accepted by `POST /publish`. The whole request is what gets published.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub meta: PublishMeta,

    #[serde(default)]
    pub data: Value,
}

impl PublishRequest {
    pub fn trim(&mut self) {
        self.meta.topic = self.meta.topic.trim().to_string();
        if let Some(token) = self.meta.access_token.as_mut() {
            *token = token.trim().to_string();
        }
    }
}
