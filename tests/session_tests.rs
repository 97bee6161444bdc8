//! Integration tests for the chat session state machine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use llm_chat_relay::client::session::{
    ChatSession, SendOutcome, SessionOptions, SessionPhase, FAILURE_MESSAGE, HISTORY_WINDOW,
};
use llm_chat_relay::client::transport::{RelayTransport, TextChunkStream};
use llm_chat_relay::error::ClientError;
use llm_chat_relay::message::{ChatRole, RelayRequest};

type ChunkSender = mpsc::UnboundedSender<Result<String, ClientError>>;
type Scripted = Result<mpsc::UnboundedReceiver<Result<String, ClientError>>, ClientError>;

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RelayRequest>>,
}

/// Transport whose responses are fed by the test through channels.
#[derive(Clone, Default)]
struct ChannelTransport {
    shared: Arc<Shared>,
}

impl ChannelTransport {
    /// Queue a successful response and return the sender feeding its body.
    fn expect_stream(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.script.lock().unwrap().push_back(Ok(rx));
        tx
    }

    fn expect_error(&self, err: ClientError) {
        self.shared.script.lock().unwrap().push_back(Err(err));
    }

    fn requests(&self) -> Vec<RelayRequest> {
        self.shared.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayTransport for ChannelTransport {
    async fn open(&self, request: RelayRequest) -> Result<TextChunkStream, ClientError> {
        self.shared.requests.lock().unwrap().push(request);
        let next = self.shared.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Err(e)) => Err(e),
            None => Err(ClientError::Transport("nothing scripted".to_string())),
        }
    }
}

fn new_session() -> (ChatSession<ChannelTransport>, ChannelTransport) {
    let transport = ChannelTransport::default();
    let session = ChatSession::new(transport.clone(), SessionOptions::default());
    (session, transport)
}

async fn wait_until<T, F>(session: &ChatSession<T>, condition: F)
where
    T: RelayTransport,
    F: Fn(&ChatSession<T>) -> bool,
{
    let mut updates = session.subscribe();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition(session) {
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("session never reached the expected state");
}

fn spawn_send(
    session: &ChatSession<ChannelTransport>,
    text: &'static str,
) -> tokio::task::JoinHandle<SendOutcome> {
    let session = session.clone();
    tokio::spawn(async move { session.send(text).await })
}

#[tokio::test]
async fn test_send_streams_reply() {
    let (session, transport) = new_session();
    let tx = transport.expect_stream();
    tx.send(Ok("He".into())).unwrap();
    tx.send(Ok("llo".into())).unwrap();
    drop(tx);

    let outcome = session.send("  hi  ").await;

    assert_eq!(outcome, SendOutcome::Completed);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.last_assistant_reply().as_deref(), Some("Hello"));

    let messages = session.messages();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![ChatRole::Developer, ChatRole::User, ChatRole::Assistant]
    );
    assert_eq!(messages[1].content, "hi");

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model.as_deref(), Some("gpt-4o-mini"));
    // Developer instruction plus the new user message; no placeholder.
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[0].messages[1].content, "hi");
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let (session, transport) = new_session();

    assert_eq!(session.send("").await, SendOutcome::Ignored);
    assert_eq!(session.send(" \n\t ").await, SendOutcome::Ignored);

    assert!(transport.requests().is_empty());
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn test_second_send_while_streaming_is_ignored() {
    let (session, transport) = new_session();
    let tx = transport.expect_stream();

    let first = spawn_send(&session, "first");
    wait_until(&session, |s| s.phase() == SessionPhase::Streaming).await;

    assert_eq!(session.send("second").await, SendOutcome::Ignored);
    assert_eq!(session.messages().len(), 3);
    assert_eq!(transport.requests().len(), 1);

    tx.send(Ok("ok".into())).unwrap();
    drop(tx);
    assert_eq!(first.await.unwrap(), SendOutcome::Completed);
    assert!(!session.is_streaming());
}

#[tokio::test]
async fn test_stop_keeps_partial_reply() {
    let (session, transport) = new_session();
    let tx = transport.expect_stream();

    let running = spawn_send(&session, "tell me a story");
    tx.send(Ok("Once upon".into())).unwrap();
    wait_until(&session, |s| {
        s.last_assistant_reply().as_deref() == Some("Once upon")
    })
    .await;

    assert!(session.stop());
    assert_eq!(running.await.unwrap(), SendOutcome::Cancelled);

    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.last_assistant_reply().as_deref(), Some("Once upon"));
    assert!(!session.stop());

    // Late chunks never reach the conversation.
    let _ = tx.send(Ok(" a time".into()));
    assert_eq!(session.last_assistant_reply().as_deref(), Some("Once upon"));
}

#[tokio::test]
async fn test_dropped_send_returns_to_idle() {
    let (session, transport) = new_session();
    let tx = transport.expect_stream();

    let running = spawn_send(&session, "tell me a story");
    tx.send(Ok("Once upon".into())).unwrap();
    wait_until(&session, |s| {
        s.last_assistant_reply().as_deref() == Some("Once upon")
    })
    .await;

    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.last_assistant_reply().as_deref(), Some("Once upon"));
    assert!(!session.stop());
    // The aborted request's body is no longer read.
    assert!(tx.send(Ok(" a time".into())).is_err());

    let tx = transport.expect_stream();
    tx.send(Ok("Again".into())).unwrap();
    drop(tx);
    assert_eq!(session.send("once more").await, SendOutcome::Completed);
    assert_eq!(session.last_assistant_reply().as_deref(), Some("Again"));
    assert!(session.clear());
}

/// Transport whose `open` stays pending until the test releases it.
struct GatedTransport {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl RelayTransport for GatedTransport {
    async fn open(&self, _request: RelayRequest) -> Result<TextChunkStream, ClientError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(Box::pin(futures::stream::empty()))
    }
}

#[tokio::test]
async fn test_stop_while_sending_cancels_open() {
    let (release, gate) = oneshot::channel();
    let session = ChatSession::new(
        GatedTransport {
            gate: Mutex::new(Some(gate)),
        },
        SessionOptions::default(),
    );

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.send("hi").await })
    };
    wait_until(&session, |s| s.phase() == SessionPhase::Sending).await;

    assert!(session.stop());
    assert_eq!(running.await.unwrap(), SendOutcome::Cancelled);

    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.last_assistant_reply().as_deref(), Some(""));
    drop(release);
}

#[tokio::test]
async fn test_rejected_request_shows_failure_message() {
    let (session, transport) = new_session();
    transport.expect_error(ClientError::Status(429));

    let outcome = session.send("hi").await;

    assert_eq!(outcome, SendOutcome::Failed(ClientError::Status(429)));
    assert_eq!(session.last_assistant_reply().as_deref(), Some(FAILURE_MESSAGE));
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_mid_stream_failure_replaces_partial_reply() {
    let (session, transport) = new_session();
    let tx = transport.expect_stream();
    tx.send(Ok("Half".into())).unwrap();
    tx.send(Err(ClientError::Transport("connection reset".into())))
        .unwrap();

    let outcome = session.send("hi").await;

    assert!(matches!(outcome, SendOutcome::Failed(ClientError::Transport(_))));
    assert_eq!(session.last_assistant_reply().as_deref(), Some(FAILURE_MESSAGE));
}

#[tokio::test]
async fn test_clear_refused_while_streaming() {
    let (session, transport) = new_session();
    let tx = transport.expect_stream();

    let running = spawn_send(&session, "hi");
    wait_until(&session, |s| s.is_streaming()).await;

    assert!(!session.clear());
    assert_eq!(session.messages().len(), 3);

    drop(tx);
    assert_eq!(running.await.unwrap(), SendOutcome::Completed);

    assert!(session.clear());
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, ChatRole::Developer);
    assert!(session.visible_messages().is_empty());
}

#[tokio::test]
async fn test_only_recent_history_is_sent() {
    let (session, transport) = new_session();

    for i in 0..7 {
        let tx = transport.expect_stream();
        tx.send(Ok(format!("answer {i}"))).unwrap();
        drop(tx);
        assert_eq!(session.send(&format!("question {i}")).await, SendOutcome::Completed);
    }

    let requests = transport.requests();
    let last = &requests[6];
    assert_eq!(last.messages.len(), HISTORY_WINDOW);
    assert_eq!(last.messages.last().unwrap().content, "question 6");
    assert!(last.messages.iter().all(|m| m.role != ChatRole::Developer));
    assert_eq!(session.messages().len(), 15);
}

#[tokio::test]
async fn test_draft_cleared_by_send_and_clear() {
    let (session, transport) = new_session();

    assert!(session.set_draft("hello there"));
    let tx = transport.expect_stream();
    drop(tx);
    assert_eq!(session.send_draft().await, SendOutcome::Completed);
    assert_eq!(session.draft(), "");
    assert_eq!(transport.requests()[0].messages[1].content, "hello there");

    session.set_draft("unsent");
    session.clear();
    assert_eq!(session.draft(), "");
}

#[tokio::test]
async fn test_updates_published_per_chunk() {
    let (session, transport) = new_session();
    let mut updates = session.subscribe();
    let start = updates.borrow_and_update().revision;

    let tx = transport.expect_stream();
    for chunk in ["a", "b", "c"] {
        tx.send(Ok(chunk.into())).unwrap();
    }
    drop(tx);
    session.send("go").await;

    let last = updates.borrow_and_update().clone();
    // Sending, Streaming, three chunks, back to Idle.
    assert_eq!(last.revision - start, 6);
    assert_eq!(last.phase, SessionPhase::Idle);
    assert_eq!(last.last_outcome, Some(SendOutcome::Completed));
}
