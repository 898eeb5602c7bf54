use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Delivery medium of a notification. Unrecognised names are kept verbatim so
/// they can be forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationChannel {
    Email,
    Sms,
    Whatsapp,
    PushNotification,
    Other(String),
}

impl NotificationChannel {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationChannel::Email => "EMAIL",
            NotificationChannel::Sms => "SMS",
            NotificationChannel::Whatsapp => "WHATSAPP",
            NotificationChannel::PushNotification => "PUSH_NOTIFICATION",
            NotificationChannel::Other(name) => name,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        NotificationChannel::Other(String::new())
    }
}

impl From<String> for NotificationChannel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "EMAIL" => NotificationChannel::Email,
            "SMS" => NotificationChannel::Sms,
            "WHATSAPP" => NotificationChannel::Whatsapp,
            "PUSH_NOTIFICATION" => NotificationChannel::PushNotification,
            _ => NotificationChannel::Other(value),
        }
    }
}

impl From<NotificationChannel> for String {
    fn from(value: NotificationChannel) -> Self {
        match value {
            NotificationChannel::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for NotificationChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Explicit `null` reads as the field's zero value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payload fields are coerced one by one: a null or mistyped field falls back
/// to its zero value without discarding its siblings.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailPayload {
    #[serde(deserialize_with = "lenient")]
    pub html: String,
    #[serde(deserialize_with = "lenient")]
    pub plain_text: String,
}

/// Shared by SMS and WhatsApp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePayload {
    #[serde(deserialize_with = "lenient")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PushNotificationPayload {
    #[serde(deserialize_with = "lenient")]
    pub device_token: String,
    #[serde(deserialize_with = "lenient")]
    pub title: String,
    #[serde(deserialize_with = "lenient")]
    pub body: String,

    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    Email(EmailPayload),
    Message(MessagePayload),
    Push(PushNotificationPayload),
    Raw(Value),
}

impl Default for NotificationPayload {
    fn default() -> Self {
        NotificationPayload::Raw(Value::Null)
    }
}

/// A decoded notification whose payload has already been coerced into the
/// variant matching its channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub user_id: i64,
    pub user_name: String,
    pub channel: NotificationChannel,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub recipient: String,
    pub payload: NotificationPayload,
}

/// First decoding pass: the payload shape is unknown until `channel` is read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawNotification {
    #[serde(deserialize_with = "null_as_default")]
    pub user_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub user_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub channel: NotificationChannel,
    pub subject: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub recipient: String,
    pub payload: Value,
}
