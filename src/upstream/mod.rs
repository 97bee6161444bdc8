//! Client side of the external model-serving API.
//!
//! - [`openai`]: streaming "create response" call against the OpenAI Responses API
//! - [`sse`]: incremental Server-Sent Events frame decoder

pub mod openai;
pub mod sse;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::message::ChatMessage;

/// A typed event from the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// An incremental fragment of generated text.
    TextDelta(String),
    /// The response finished; nothing after this is relayed.
    Completed,
    /// Any other event kind, identified by its type tag.
    Other(String),
    /// The upstream reported a failure mid-stream.
    Error(String),
}

/// A streaming generation request.
#[derive(Debug, Clone)]
pub struct ResponseRequest {
    pub model: String,
    pub input: Vec<ChatMessage>,
}

/// An external model API that streams typed events.
///
/// The returned receiver is pulled lazily. Dropping it tears the upstream
/// call down: the producer notices the closed channel and releases the
/// connection.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn stream_response(
        &self,
        request: ResponseRequest,
    ) -> Result<mpsc::Receiver<UpstreamEvent>, RelayError>;
}
