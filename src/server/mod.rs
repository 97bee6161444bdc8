//! HTTP server relaying chat requests to the upstream model API.
//!
//! - [`relay_api`]: Route handlers, validation and rate-limit key derivation
//! - [`streaming`]: Plain-text streaming of upstream text deltas

pub mod relay_api;
pub mod streaming;
