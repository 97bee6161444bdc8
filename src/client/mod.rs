//! Chat client for the relay.
//!
//! - [`session`]: Conversation state and the single in-flight stream
//! - [`transport`]: HTTP transport and streaming UTF-8 decoding
//! - [`terminal`]: Interactive terminal front-end

pub mod session;
pub mod terminal;
pub mod transport;
