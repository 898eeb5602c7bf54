use crate::models::publish::PublishRequest;

/// Returns one message per invalid field, empty when the request is valid.
pub fn validate_publish_request(request: &PublishRequest) -> Vec<String> {
    let mut messages = Vec::new();

    if request.meta.topic.trim().is_empty() {
        messages.push("Topic is required.".to_string());
    }

    if request.data.is_null() {
        messages.push("Data is required.".to_string());
    }

    messages
}
