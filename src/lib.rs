//! llm-chat-relay: streaming chat relay for a hosted LLM.
//!
//! The server half accepts a bounded conversation on `POST /api/llm`,
//! forwards it to the upstream Responses API with streaming enabled and
//! relays the text deltas back as a plain-text body. The client half keeps
//! the conversation and drives one stream at a time.

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod rate_limit;
pub mod server;
pub mod upstream;
