//! Error taxonomy for the relay (with its HTTP rendering) and the chat client.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors produced while serving `POST /api/llm`.
///
/// Every variant is terminal for the current request; nothing is retried.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream credential is not configured.
    #[error("Missing OPENAI_API_KEY")]
    MissingCredential,

    /// The client key exhausted its request budget for the current window.
    #[error("Too many requests. Please try again later.")]
    RateLimited { retry_after: Duration },

    /// Malformed or oversized payload.
    #[error("{0}")]
    Validation(String),

    /// The upstream API could not be reached or failed mid-stream.
    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

impl RelayError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        Self::Upstream(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Upstream details stay in the logs.
        let body = match &self {
            RelayError::Upstream(reason) => {
                tracing::error!(error = %reason, "Upstream failure");
                "Upstream request failed".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response();

        if let RelayError::RateLimited { retry_after } = self {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Errors seen by a chat client talking to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The relay answered with a non-success status.
    #[error("relay returned HTTP {0}")]
    Status(u16),

    /// The request or the response body failed in transit.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller stopped the request.
    #[error("request cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::MissingCredential.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::validation("Too many messages").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::upstream("boom").status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = RelayError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
