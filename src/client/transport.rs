//! Transport between a chat session and the relay endpoint.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::error::ClientError;
use crate::message::RelayRequest;

/// Lazy, finite, non-restartable sequence of decoded text fragments.
pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// Opens a streaming relay request.
///
/// Dropping the returned stream (or the pending `open` future) aborts the
/// underlying request.
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    async fn open(&self, request: RelayRequest) -> Result<TextChunkStream, ClientError>;
}

/// Streaming UTF-8 decoder.
///
/// Holds back an incomplete trailing sequence until the next chunk completes
/// it. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // The prefix up to `valid_up_to` is valid UTF-8.
                    out.push_str(std::str::from_utf8(&self.pending[..valid_up_to]).unwrap_or_default());

                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            self.pending.drain(..valid_up_to);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush leftover bytes once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// HTTP transport posting to a relay's `/api/llm` endpoint.
#[derive(Debug, Clone)]
pub struct HttpRelayTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpRelayTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn open(&self, request: RelayRequest) -> Result<TextChunkStream, ClientError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "Relay rejected request");
            return Err(ClientError::Status(status.as_u16()));
        }

        let bytes = Box::pin(response.bytes_stream());
        let chunks = stream::unfold(
            (bytes, Utf8ChunkDecoder::new(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.push(&chunk);
                            if !text.is_empty() {
                                return Some((Ok(text), (bytes, decoder, false)));
                            }
                        }
                        Some(Err(e)) => {
                            let err = ClientError::Transport(e.to_string());
                            return Some((Err(err), (bytes, decoder, true)));
                        }
                        None => {
                            return decoder
                                .finish()
                                .map(|tail| (Ok(tail), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}
