use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::models::notification::{
    EmailPayload, MessagePayload, NotificationChannel, NotificationPayload, NotificationRecord,
    PushNotificationPayload, RawNotification,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("field 'data' not found in message")]
    MissingData,

    #[error("failed to decode notification data: {0}")]
    Data(#[source] serde_json::Error),

    #[error("required notification fields are missing")]
    MissingRequiredFields,
}

/// Decodes a broker message body of the form `{"data": {...}}` into a
/// validated notification.
pub fn decode_notification(raw: &[u8]) -> Result<NotificationRecord, DecodeError> {
    let data = extract_data_field(raw)?;
    parse_notification_data(data)
}

fn extract_data_field(raw: &[u8]) -> Result<Value, DecodeError> {
    let mut envelope: Map<String, Value> =
        serde_json::from_slice(raw).map_err(DecodeError::Envelope)?;

    envelope.remove("data").ok_or(DecodeError::MissingData)
}

fn parse_notification_data(data: Value) -> Result<NotificationRecord, DecodeError> {
    if data.is_null() {
        return Err(DecodeError::MissingRequiredFields);
    }

    let raw: RawNotification = serde_json::from_value(data).map_err(DecodeError::Data)?;

    if raw.user_id == 0 || raw.channel.is_empty() || raw.recipient.is_empty() {
        return Err(DecodeError::MissingRequiredFields);
    }

    let payload = parse_typed_payload(&raw.channel, raw.payload);

    Ok(NotificationRecord {
        user_id: raw.user_id,
        user_name: raw.user_name,
        channel: raw.channel,
        subject: raw.subject.filter(|subject| !subject.is_empty()),
        recipient: raw.recipient,
        payload,
    })
}

/// Second pass: the channel is known, so the generic payload can be read as
/// its concrete variant.
pub fn parse_typed_payload(channel: &NotificationChannel, raw: Value) -> NotificationPayload {
    match channel {
        NotificationChannel::Email => {
            NotificationPayload::Email(coerce::<EmailPayload>(channel, raw))
        }
        NotificationChannel::Sms | NotificationChannel::Whatsapp => {
            NotificationPayload::Message(coerce::<MessagePayload>(channel, raw))
        }
        NotificationChannel::PushNotification => {
            NotificationPayload::Push(coerce::<PushNotificationPayload>(channel, raw))
        }
        NotificationChannel::Other(_) => NotificationPayload::Raw(raw),
    }
}

/// Object payloads are coerced field by field; anything else becomes the
/// variant's empty value.
fn coerce<T>(channel: &NotificationChannel, raw: Value) -> T
where
    T: DeserializeOwned + Default,
{
    if raw.is_null() {
        return T::default();
    }

    if !raw.is_object() {
        warn!(%channel, "Payload is not an object, using empty payload");
        return T::default();
    }

    serde_json::from_value(raw).unwrap_or_else(|e| {
        warn!(%channel, error = %e, "Payload does not match channel shape, using empty payload");
        T::default()
    })
}
