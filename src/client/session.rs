//! Chat session: conversation state plus a single in-flight relay stream.
//!
//! The session owns the "one active stream" invariant. `send` is refused
//! while a stream is running, `clear` is refused too, and `stop` cancels the
//! running stream through a [`CancellationToken`].
//!
//! Phase machine per send:
//!
//! ```text
//! Idle → Sending → Streaming → {Completed | Cancelled | Failed} → Idle
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::transport::RelayTransport;
use crate::config::DEFAULT_MODEL;
use crate::error::ClientError;
use crate::message::{ChatMessage, ChatRole, RelayRequest};

/// Messages sent per request, counted from the end of the conversation.
pub const HISTORY_WINDOW: usize = 12;

/// Shown in place of the assistant reply when a request fails.
pub const FAILURE_MESSAGE: &str =
    "Oops… the response failed. Check the /api/llm route and your API key.";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer clearly and directly. If context is missing, ask first.";

/// A message held by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
}

impl SessionMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
        }
    }

    fn to_wire(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Request issued, no response yet.
    Sending,
    /// Receiving chunks.
    Streaming,
}

/// How a `send` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty input or a stream already in flight; nothing happened.
    Ignored,
    Completed,
    /// Stopped by the caller; partial content kept.
    Cancelled,
    /// The request failed; the reply shows [`FAILURE_MESSAGE`].
    Failed(ClientError),
}

/// Change notification for observers (a UI redraws on every revision).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub revision: u64,
    pub phase: SessionPhase,
    pub last_outcome: Option<SendOutcome>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub system_prompt: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

struct SessionState {
    messages: Vec<SessionMessage>,
    phase: SessionPhase,
    cancel: Option<CancellationToken>,
    draft: String,
    revision: u64,
    last_outcome: Option<SendOutcome>,
}

struct Inner<T> {
    transport: T,
    model: String,
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionUpdate>,
}

/// Handle to a chat session. Clones share the same conversation.
pub struct ChatSession<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ChatSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: RelayTransport> ChatSession<T> {
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let state = SessionState {
            messages: vec![SessionMessage::new(
                ChatRole::Developer,
                options.system_prompt,
            )],
            phase: SessionPhase::Idle,
            cancel: None,
            draft: String::new(),
            revision: 0,
            last_outcome: None,
        };
        let (updates, _) = watch::channel(SessionUpdate {
            revision: 0,
            phase: SessionPhase::Idle,
            last_outcome: None,
        });

        Self {
            inner: Arc::new(Inner {
                transport,
                model: options.model,
                state: Mutex::new(state),
                updates,
            }),
        }
    }

    /// Send `text` and stream the reply into the conversation.
    ///
    /// Resolves once the stream has completed, been cancelled, or failed.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let trimmed = text.trim();

        let (request, assistant_id, token) = {
            let mut state = self.lock();
            if trimmed.is_empty() || state.phase != SessionPhase::Idle {
                return SendOutcome::Ignored;
            }

            let user = SessionMessage::new(ChatRole::User, trimmed);
            let assistant = SessionMessage::new(ChatRole::Assistant, "");
            let assistant_id = assistant.id;

            state.messages.push(user);
            let start = state.messages.len().saturating_sub(HISTORY_WINDOW);
            let request = RelayRequest {
                messages: state.messages[start..]
                    .iter()
                    .map(SessionMessage::to_wire)
                    .collect(),
                model: Some(self.inner.model.clone()),
            };
            state.messages.push(assistant);

            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            state.draft.clear();
            state.phase = SessionPhase::Sending;
            self.publish(&mut state);

            (request, assistant_id, token)
        };

        let mut in_flight = InFlight {
            session: self,
            token: token.clone(),
            armed: true,
        };

        info!(messages = request.messages.len(), "Sending chat request");
        let result = self.stream_reply(request, assistant_id, &token).await;
        in_flight.armed = false;

        let mut state = self.lock();
        let outcome = match result {
            Ok(()) => SendOutcome::Completed,
            Err(_) if token.is_cancelled() => SendOutcome::Cancelled,
            Err(ClientError::Cancelled) => SendOutcome::Cancelled,
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                if let Some(reply) = state.messages.iter_mut().find(|m| m.id == assistant_id) {
                    reply.content = FAILURE_MESSAGE.to_string();
                }
                SendOutcome::Failed(e)
            }
        };

        debug!(?outcome, "Chat request finished");
        state.cancel = None;
        state.phase = SessionPhase::Idle;
        state.last_outcome = Some(outcome.clone());
        self.publish(&mut state);
        outcome
    }

    async fn stream_reply(
        &self,
        request: RelayRequest,
        assistant_id: Uuid,
        token: &CancellationToken,
    ) -> Result<(), ClientError> {
        let mut chunks = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ClientError::Cancelled),
            opened = self.inner.transport.open(request) => opened?,
        };

        self.set_phase(SessionPhase::Streaming);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ClientError::Cancelled),
                next = chunks.next() => next,
            };

            match next {
                Some(Ok(text)) => self.append_to(assistant_id, &text),
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }

    /// Cancel the in-flight stream. Returns whether there was one.
    pub fn stop(&self) -> bool {
        let state = self.lock();
        match &state.cancel {
            Some(token) => {
                info!("Stopping chat stream");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every non-developer message and reset the draft.
    ///
    /// Refused while a stream is in flight.
    pub fn clear(&self) -> bool {
        let mut state = self.lock();
        if state.phase != SessionPhase::Idle {
            return false;
        }
        state.messages.retain(|m| m.role == ChatRole::Developer);
        state.draft.clear();
        self.publish(&mut state);
        true
    }

    /// Set the pending input text. Ignored while streaming.
    pub fn set_draft(&self, text: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.phase != SessionPhase::Idle {
            return false;
        }
        state.draft = text.into();
        true
    }

    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    /// Send the current draft.
    pub async fn send_draft(&self) -> SendOutcome {
        let draft = self.draft();
        self.send(&draft).await
    }

    pub fn messages(&self) -> Vec<SessionMessage> {
        self.lock().messages.clone()
    }

    /// Messages a UI shows: everything except the developer instruction.
    pub fn visible_messages(&self) -> Vec<SessionMessage> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::Developer)
            .cloned()
            .collect()
    }

    /// Content of the most recent assistant message, if any.
    pub fn last_assistant_reply(&self) -> Option<String> {
        self.lock()
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
            .map(|m| m.content.clone())
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn is_streaming(&self) -> bool {
        self.phase() != SessionPhase::Idle
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    fn append_to(&self, id: Uuid, text: &str) {
        let mut state = self.lock();
        if let Some(reply) = state.messages.iter_mut().find(|m| m.id == id) {
            reply.content.push_str(text);
        }
        self.publish(&mut state);
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.lock();
        state.phase = phase;
        self.publish(&mut state);
    }

    fn publish(&self, state: &mut SessionState) {
        state.revision += 1;
        self.inner.updates.send_replace(SessionUpdate {
            revision: state.revision,
            phase: state.phase,
            last_outcome: state.last_outcome.clone(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Returns the session to Idle when a `send` future is dropped before it
/// finishes. The partial reply is kept, as with [`ChatSession::stop`].
struct InFlight<'a, T: RelayTransport> {
    session: &'a ChatSession<T>,
    token: CancellationToken,
    armed: bool,
}

impl<T: RelayTransport> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Chat request dropped before finishing");
        self.token.cancel();
        let mut state = self.session.lock();
        state.cancel = None;
        state.phase = SessionPhase::Idle;
        state.last_outcome = Some(SendOutcome::Cancelled);
        self.session.publish(&mut state);
    }
}
