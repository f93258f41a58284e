//! HTTP gateway
//!
//! Exposes the same handlers as the broker without a broker in between, for
//! tooling and health checks. Requests run through the same dispatcher, so
//! they count against the same quotas and share the same idempotency records.
//!
//! # API Endpoints
//!
//! ## POST /{version}/{action}
//!
//! The body is the handler payload (an empty body means `{}`).
//!
//! | Header            | Meaning                                        |
//! |-------------------|------------------------------------------------|
//! | `Authorization`   | `Bearer <secret>`                              |
//! | `X-Api-Key`       | the secret, when `Authorization` is absent      |
//! | `Idempotency-Key` | deduplication key for idempotent actions       |
//! | `X-Client-Id`     | rate-limit identity, defaults to the peer IP   |
//!
//! ### Response
//!
//! `200` with the handler's data, or an error status with:
//!
//! ```json
//! { "detail": "Book not found" }
//! ```
//!
//! | Status | When                                              |
//! |--------|---------------------------------------------------|
//! | 400    | invalid JSON, domain error, key still in progress |
//! | 401    | wrong secret                                      |
//! | 404    | unknown action or version                         |
//! | 429    | quota exhausted, with `Retry-After`                 |
//! | 500    | unexpected failure                                |
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.
//!
//! ## GET /metrics
//!
//! Prometheus text exposition of the dispatcher metrics.

use super::Transport;
use crate::dispatcher::{ANONYMOUS_CLIENT, Dispatcher, Outcome};
use crate::metrics::{Disposition, Transport as MetricsTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use bookwire::broker::{LIMIT_REMAINING_HEADER, RETRY_AFTER_HEADER};
use bookwire::{Admission, RequestEnvelope, errors};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Largest request body accepted
const MAX_BODY_BYTES: usize = 1024 * 1024;

const API_KEY_HEADER: &str = "x-api-key";
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const CLIENT_ID_HEADER: &str = "x-client-id";

/// HTTP transport implementation
pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid HTTP address {host}:{port}"))?;
        Ok(Self { addr })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, dispatcher: Arc<Dispatcher>) -> Result<()> {
        let app = router(dispatcher);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Routes of the gateway
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    let app_state = Arc::new(AppState { dispatcher });

    Router::new()
        .route("/{version}/{action}", post(handle_call))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(handle_metrics))
        .with_state(app_state)
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.dispatcher.metrics().export_prometheus(),
    )
}

async fn handle_call(
    State(state): State<Arc<AppState>>,
    Path((version, action)): Path<(String, String)>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let (disposition, response) = match read_payload(body).await {
        Some(payload) => {
            let envelope = envelope_from_headers(&parts.headers, action, version, payload);
            let identity = header_str(&parts.headers, CLIENT_ID_HEADER)
                .map(str::to_string)
                .or(peer)
                .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string());

            let outcome = state
                .dispatcher
                .execute(envelope, &identity, SystemTime::now())
                .await;
            into_response(outcome)
        }
        None => (
            Disposition::Malformed,
            detail(StatusCode::BAD_REQUEST, errors::INVALID_JSON),
        ),
    };

    state.dispatcher.metrics().record(
        MetricsTransport::Http,
        disposition,
        started.elapsed().as_micros() as u64,
    );
    response
}

async fn read_payload(body: axum::body::Body) -> Option<Value> {
    let bytes: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await.ok()?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Some(json!({}));
    }
    serde_json::from_slice(&bytes).ok()
}

fn envelope_from_headers(
    headers: &HeaderMap,
    action: String,
    version: String,
    payload: Value,
) -> RequestEnvelope {
    let auth = header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| header_str(headers, API_KEY_HEADER))
        .unwrap_or_default();

    let mut envelope = RequestEnvelope::new(action, version, payload, auth);
    if let Some(key) = header_str(headers, IDEMPOTENCY_KEY_HEADER) {
        envelope = envelope.with_idempotency_key(key);
    }
    envelope
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn into_response(outcome: Outcome) -> (Disposition, Response) {
    let reply = match outcome {
        Outcome::Replied(reply) => reply,
        Outcome::DeadLettered(err) => {
            tracing::error!("HTTP request failed: {:#}", err);
            return (
                Disposition::DeadLettered,
                detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            );
        }
    };

    let status = match reply.disposition {
        Disposition::Ok | Disposition::CacheHit => StatusCode::OK,
        Disposition::Unauthorized => StatusCode::UNAUTHORIZED,
        Disposition::UnknownAction => StatusCode::NOT_FOUND,
        Disposition::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Disposition::Malformed | Disposition::InFlight | Disposition::DomainError => {
            StatusCode::BAD_REQUEST
        }
        Disposition::DeadLettered => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut response = match reply.result {
        Ok(data) => (status, Json(data)).into_response(),
        Err(message) => detail(status, &message),
    };
    if let Some(admission) = reply.admission {
        add_limit_headers(response.headers_mut(), admission);
    }

    (reply.disposition, response)
}

fn add_limit_headers(headers: &mut HeaderMap, admission: Admission) {
    headers.insert(
        LIMIT_REMAINING_HEADER,
        HeaderValue::from(admission.remaining()),
    );
    if let Admission::Rejected { .. } = admission {
        headers.insert(
            RETRY_AFTER_HEADER,
            HeaderValue::from(admission.retry_after_secs()),
        );
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}
