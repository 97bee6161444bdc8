//! Relay HTTP API.
//!
//! - POST /api/llm
//! - GET /health

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, LimitsConfig};
use crate::error::RelayError;
use crate::message::{ChatMessage, RelayRequest};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::server::streaming::relay_text_stream;
use crate::upstream::{ModelBackend, ResponseRequest};

/// Header identifying the client for rate limiting.
pub const CLIENT_KEY_HEADER: &str = "x-forwarded-for";

/// Bucket shared by every request without a client header.
pub const UNKNOWN_CLIENT_KEY: &str = "unknown";

/// Application state shared across handlers.
pub struct AppState {
    pub backend: Arc<dyn ModelBackend>,
    pub limiter: Arc<dyn RateLimiter>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        limiter: Arc<dyn RateLimiter>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            backend,
            limiter,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/llm", post(relay_llm))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub tracked_rate_limit_keys: usize,
}

/// Derive the rate-limit key from the request headers.
pub fn rate_limit_key(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_CLIENT_KEY)
        .to_string()
}

/// Check message count and per-message size bounds.
pub fn validate_messages(messages: &[ChatMessage], limits: &LimitsConfig) -> Result<(), RelayError> {
    if messages.is_empty() {
        return Err(RelayError::validation("Invalid messages"));
    }
    if messages.len() > limits.max_messages {
        return Err(RelayError::validation("Too many messages"));
    }
    if messages
        .iter()
        .any(|m| m.content.chars().count() > limits.max_message_chars)
    {
        return Err(RelayError::validation("Message too long"));
    }
    Ok(())
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn relay_llm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let request_id = Uuid::new_v4().to_string();

    if !state.config.has_credential() {
        warn!(request_id = %request_id, "Rejecting request: no upstream credential");
        return Err(RelayError::MissingCredential);
    }

    let client_key = rate_limit_key(&headers);
    if let RateDecision::Limited { retry_after } = state.limiter.check(&client_key) {
        info!(
            request_id = %request_id,
            client = %client_key,
            retry_after_secs = retry_after.as_secs(),
            "Rate limited"
        );
        return Err(RelayError::RateLimited { retry_after });
    }

    let req: RelayRequest = serde_json::from_slice(&body)
        .map_err(|_| RelayError::validation("Invalid messages"))?;
    validate_messages(&req.messages, &state.config.limits)?;

    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.upstream.default_model.clone());

    info!(
        request_id = %request_id,
        client = %client_key,
        model = %model,
        messages = req.messages.len(),
        "Relay request"
    );

    let rx = state
        .backend
        .stream_response(ResponseRequest {
            model,
            input: req.messages,
        })
        .await?;

    let stream = relay_text_stream(rx, request_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        tracked_rate_limit_keys: state.limiter.tracked_keys(),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_rate_limit_key_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_KEY_HEADER, HeaderValue::from_static(" 10.0.0.1 "));
        assert_eq!(rate_limit_key(&headers), "10.0.0.1");
    }

    #[test]
    fn test_rate_limit_key_falls_back() {
        assert_eq!(rate_limit_key(&HeaderMap::new()), UNKNOWN_CLIENT_KEY);

        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_KEY_HEADER, HeaderValue::from_static(""));
        assert_eq!(rate_limit_key(&headers), UNKNOWN_CLIENT_KEY);
    }

    #[test]
    fn test_validate_bounds() {
        let limits = LimitsConfig::default();

        assert!(validate_messages(&[], &limits).is_err());
        assert!(validate_messages(&[ChatMessage::user("hi")], &limits).is_ok());

        let many = vec![ChatMessage::user("x"); 21];
        let err = validate_messages(&many, &limits).unwrap_err();
        assert_eq!(err.to_string(), "Too many messages");

        let exactly = vec![ChatMessage::user("x"); 20];
        assert!(validate_messages(&exactly, &limits).is_ok());
    }

    #[test]
    fn test_content_counted_in_characters() {
        let limits = LimitsConfig::default();

        // 2000 multi-byte characters are within bounds.
        let wide = ChatMessage::user("é".repeat(2000));
        assert!(validate_messages(&[wide], &limits).is_ok());

        let long = ChatMessage::user("a".repeat(2001));
        let err = validate_messages(&[long], &limits).unwrap_err();
        assert_eq!(err.to_string(), "Message too long");
    }
}
