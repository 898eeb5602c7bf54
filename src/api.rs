use std::{any::Any, sync::Arc, time::Duration};

use anyhow::{Error, Result};
use axum::{
    Router,
    body::Bytes,
    extract::{Request, State},
    http::{
        HeaderMap, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_LENGTH},
    },
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::json;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::{
        publish::PublishRequest,
        response::{ErrorResponse, HttpResponse},
        validation::validate_publish_request,
    },
    publisher::PublishService,
    utils::wait_for_shutdown,
};

const HEALTH_MESSAGE: &str = "Queue on Air!";
const INTERNAL_ERROR_MESSAGE: &str = "Something went wrong on our side. Please contact support.";

#[derive(Debug, Clone)]
pub struct BasicAuthCredentials {
    pub username: String,
    pub password: String,
}

impl BasicAuthCredentials {
    pub fn from_config(config: &Config) -> Self {
        Self {
            username: config.basic_auth_username.clone(),
            password: config.basic_auth_password.clone(),
        }
    }
}

pub struct AppState {
    publisher: PublishService,
    credentials: BasicAuthCredentials,
}

impl AppState {
    pub fn new(publisher: PublishService, credentials: BasicAuthCredentials) -> Self {
        Self {
            publisher,
            credentials,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(cors::Any)
        .expose_headers([CONTENT_LENGTH])
        .max_age(Duration::from_secs(12 * 60 * 60));

    Router::new()
        .route("/", get(health_check))
        .route("/publish", post(publish))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), basic_auth))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    config: &Config,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await?;

    info!("HTTP server stopped");

    Ok(())
}

async fn health_check() -> &'static str {
    HEALTH_MESSAGE
}

async fn publish(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();

    let mut request: PublishRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(
                request_id = %request_id,
                error = %e,
                "Publish request body could not be decoded"
            );
            return error_response(
                ErrorResponse::new(400, "Invalid message format")
                    .with_errors(json!(format!("Failed to decode request body: {}", e))),
            );
        }
    };

    let messages = validate_publish_request(&request);
    if let Some(first) = messages.first() {
        debug!(
            request_id = %request_id,
            errors = ?messages,
            "Publish request failed validation"
        );
        return error_response(ErrorResponse::new(400, first.clone()).with_errors(json!(messages)));
    }

    request.trim();

    match state.publisher.publish(&request).await {
        Ok(message_id) => {
            info!(
                request_id = %request_id,
                topic = %request.meta.topic,
                message_id = %message_id,
                "Publish request completed"
            );
            (
                StatusCode::OK,
                Json(HttpResponse::success(true, 200, "Message published successfully")),
            )
                .into_response()
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Publish request failed");
            error_response(
                ErrorResponse::new(400, e.to_string()).with_errors(json!(format!("{:#}", e))),
            )
        }
    }
}

async fn basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/" {
        return next.run(request).await;
    }

    match authenticate(request.headers(), &state.credentials) {
        Ok(()) => next.run(request).await,
        Err(message) => {
            warn!(
                path = %request.uri().path(),
                reason = message,
                "Request rejected by basic auth"
            );
            error_response(ErrorResponse::new(400, message))
        }
    }
}

fn authenticate(
    headers: &HeaderMap,
    credentials: &BasicAuthCredentials,
) -> Result<(), &'static str> {
    let header = match headers.get(AUTHORIZATION) {
        Some(value) if !value.is_empty() => value,
        _ => return Err("Authorization header is required"),
    };

    let header = header
        .to_str()
        .map_err(|_| "Invalid authorization header")?;

    let mut parts = header.split(' ');
    let (Some("Basic"), Some(encoded), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err("Invalid authorization header");
    };

    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or("Failed to decode authorization header")?;

    match decoded.split_once(':') {
        Some((username, password))
            if username == credentials.username && password == credentials.password =>
        {
            Ok(())
        }
        _ => Err("Invalid credentials"),
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(panic = %detail, "Request handler panicked");

    error_response(ErrorResponse::new(500, INTERNAL_ERROR_MESSAGE))
}

fn error_response(error: ErrorResponse) -> Response {
    let status =
        StatusCode::from_u16(error.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error)).into_response()
}
