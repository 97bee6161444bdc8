//! Streaming client for the OpenAI Responses API.
//!
//! Opens `POST {base_url}/responses` with `stream: true` and converts the SSE
//! body into [`UpstreamEvent`]s on a bounded channel. A background task owns
//! the HTTP response; it exits (dropping the connection) after the terminal
//! event or as soon as the receiving side goes away.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::message::ChatMessage;
use crate::upstream::sse::SseDecoder;
use crate::upstream::{ModelBackend, ResponseRequest, UpstreamEvent};

const EVENT_TEXT_DELTA: &str = "response.output_text.delta";
const EVENT_COMPLETED: &str = "response.completed";
const EVENT_FAILED: &str = "response.failed";
const EVENT_ERROR: &str = "error";

#[derive(Debug, Serialize)]
struct CreateResponseBody<'a> {
    model: &'a str,
    input: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<RawResponse>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
}

/// Map one SSE data payload to an event. Unparseable payloads yield `None`.
pub fn parse_event(payload: &str) -> Option<UpstreamEvent> {
    let raw: RawEvent = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable upstream event");
            return None;
        }
    };

    let event = match raw.kind.as_str() {
        EVENT_TEXT_DELTA => UpstreamEvent::TextDelta(raw.delta.unwrap_or_default()),
        EVENT_COMPLETED => UpstreamEvent::Completed,
        EVENT_ERROR => UpstreamEvent::Error(
            raw.message
                .unwrap_or_else(|| "upstream reported an error".to_string()),
        ),
        EVENT_FAILED => UpstreamEvent::Error(
            raw.response
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "response failed".to_string()),
        ),
        _ => UpstreamEvent::Other(raw.kind),
    };
    Some(event)
}

/// OpenAI Responses API backend.
pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    connect_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(config: &UpstreamConfig) -> Result<Self, RelayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| RelayError::MissingCredential)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RelayError::upstream(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/responses", config.base_url.trim_end_matches('/')),
            connect_timeout: config.request_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn stream_response(
        &self,
        request: ResponseRequest,
    ) -> Result<mpsc::Receiver<UpstreamEvent>, RelayError> {
        let body = CreateResponseBody {
            model: &request.model,
            input: &request.input,
            stream: true,
        };

        let send = self.http.post(&self.endpoint).json(&body).send();
        let response = tokio::time::timeout(self.connect_timeout, send)
            .await
            .map_err(|_| RelayError::upstream("timed out opening upstream stream"))?
            .map_err(|e| RelayError::upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RelayError::upstream(format!("HTTP {status}: {detail}")));
        }

        info!(model = %request.model, "Upstream stream opened");

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut bytes = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "Upstream stream broke");
                        let _ = tx.send(UpstreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                for payload in decoder.push(&chunk) {
                    if !forward(&tx, &payload).await {
                        return;
                    }
                }
            }

            if let Some(payload) = decoder.finish() {
                forward(&tx, &payload).await;
            }
            debug!("Upstream stream ended without a completion event");
        });

        Ok(rx)
    }
}

/// Send one parsed payload downstream. Returns `false` once the task should
/// stop: after a terminal event, or when the receiver is gone.
async fn forward(tx: &mpsc::Sender<UpstreamEvent>, payload: &str) -> bool {
    let Some(event) = parse_event(payload) else {
        return true;
    };
    let terminal = matches!(event, UpstreamEvent::Completed | UpstreamEvent::Error(_));

    if tx.send(event).await.is_err() {
        // Receiver dropped, stop reading upstream.
        debug!("Downstream closed, releasing upstream connection");
        return false;
    }
    !terminal
}
