use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use queue_service::{
    api::{AppState, BasicAuthCredentials, build_router},
    broker::PubSubClient,
    publisher::PublishService,
};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::common::{FakePubSubClient, TEST_AUTH_HEADER, TEST_PASSWORD, TEST_USERNAME};

async fn spawn_api(pubsub: Arc<FakePubSubClient>) -> Result<SocketAddr> {
    let client: Arc<dyn PubSubClient> = pubsub;
    let state = Arc::new(AppState::new(
        PublishService::new(client),
        BasicAuthCredentials {
            username: TEST_USERNAME.to_string(),
            password: TEST_PASSWORD.to_string(),
        },
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = build_router(state);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(addr)
}

async fn post_publish(addr: SocketAddr, auth: Option<&str>, body: &str) -> Result<(StatusCode, Value)> {
    let mut request = Client::new()
        .post(format!("http://{}/publish", addr))
        .header("content-type", "application/json")
        .body(body.to_string());

    if let Some(auth) = auth {
        request = request.header("authorization", auth);
    }

    let response = request.send().await?;
    let status = response.status();
    Ok((status, response.json().await?))
}

/// Test: The health route answers without credentials
#[tokio::test]
async fn test_health_check_skips_auth() -> Result<()> {
    let addr = spawn_api(Arc::new(FakePubSubClient::default())).await?;

    let response = Client::new().get(format!("http://{}/", addr)).send().await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "Queue on Air!");

    Ok(())
}

/// Test: Each kind of bad credential gets its own message
#[tokio::test]
async fn test_basic_auth_rejections() -> Result<()> {
    let addr = spawn_api(Arc::new(FakePubSubClient::default())).await?;
    let body = r#"{"meta":{"topic":"orders"},"data":{"id":1}}"#;

    let cases = [
        (None, "Authorization header is required"),
        (Some("Bearer abc"), "Invalid authorization header"),
        (Some("Basic"), "Invalid authorization header"),
        (Some("Basic !!!"), "Failed to decode authorization header"),
        // base64("user:wrong")
        (Some("Basic dXNlcjp3cm9uZw=="), "Invalid credentials"),
        // base64("userpass")
        (Some("Basic dXNlcnBhc3M="), "Invalid credentials"),
    ];

    for (auth, expected) in cases {
        let (status, body) = post_publish(addr, auth, body).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "auth {:?}", auth);
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["message"], expected, "auth {:?}", auth);
    }

    Ok(())
}

/// Test: A valid request is trimmed and published whole
#[tokio::test]
async fn test_publish_success() -> Result<()> {
    let pubsub = Arc::new(FakePubSubClient::default());
    let addr = spawn_api(Arc::clone(&pubsub)).await?;

    let (status, body) = post_publish(
        addr,
        Some(TEST_AUTH_HEADER),
        r#"{"meta":{"topic":"  orders  ","access_token":" tok "},"data":{"orderId":9}}"#,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "data": true,
            "statusCode": 200,
            "message": "Message published successfully"
        })
    );

    let published = pubsub.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "orders");
    assert_eq!(
        serde_json::from_slice::<Value>(&published[0].1)?,
        json!({
            "meta": { "topic": "orders", "access_token": "tok" },
            "data": { "orderId": 9 }
        })
    );

    Ok(())
}

/// Test: Missing topic and data are both reported
#[tokio::test]
async fn test_publish_validation_errors() -> Result<()> {
    let pubsub = Arc::new(FakePubSubClient::default());
    let addr = spawn_api(Arc::clone(&pubsub)).await?;

    let (status, body) =
        post_publish(addr, Some(TEST_AUTH_HEADER), r#"{"meta":{"topic":"   "}}"#).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Topic is required.");
    assert_eq!(body["errors"], json!(["Topic is required.", "Data is required."]));
    assert!(pubsub.published().is_empty());

    Ok(())
}

/// Test: A body that is not JSON is rejected before validation
#[tokio::test]
async fn test_publish_rejects_malformed_body() -> Result<()> {
    let addr = spawn_api(Arc::new(FakePubSubClient::default())).await?;

    let (status, body) = post_publish(addr, Some(TEST_AUTH_HEADER), "{oops").await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid message format");
    assert!(
        body["errors"]
            .as_str()
            .is_some_and(|e| e.starts_with("Failed to decode request body")),
        "got {}",
        body
    );

    Ok(())
}

/// Test: Broker publish failures are reported as bad requests
#[tokio::test]
async fn test_publish_failure_is_reported() -> Result<()> {
    let pubsub = Arc::new(FakePubSubClient::default().with_failing_topic("missing"));
    let addr = spawn_api(pubsub).await?;

    let (status, body) = post_publish(
        addr,
        Some(TEST_AUTH_HEADER),
        r#"{"meta":{"topic":"missing"},"data":"x"}"#,
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("Failed to publish message")),
        "got {}",
        body
    );

    Ok(())
}
