//! Runtime configuration for llm-chat-relay.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The upstream credential never lives in the file; it is read from
//! `OPENAI_API_KEY` at load time.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Environment variable holding the upstream API credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable overriding the upstream base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llm-chat-relay", about = "Streaming LLM chat relay", version)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the relay server.
    Serve {
        /// Path to configuration file (JSON).
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// HTTP listen address (overrides the config file).
        #[arg(long)]
        listen: Option<String>,
    },
    /// Chat with a running relay from the terminal.
    Chat {
        /// Relay endpoint URL.
        #[arg(long, default_value = "http://127.0.0.1:8080/api/llm")]
        url: String,

        /// Model name forwarded to the relay.
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
    },
}

/// Model used when the caller does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream model API configuration.
    pub upstream: UpstreamConfig,

    /// Payload bounds and rate limiting.
    pub limits: LimitsConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream model-serving API settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the Responses API, without the trailing `/responses`.
    pub base_url: String,

    /// Model used when a request carries none.
    pub default_model: String,

    /// Timeout for establishing the upstream stream, in seconds.
    pub request_timeout_secs: u64,

    /// Bearer credential, populated from the environment only.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: 120,
            api_key: None,
        }
    }
}

// Hand-written so the credential never reaches the logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Input bounds and abuse protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of messages per request.
    pub max_messages: usize,

    /// Maximum characters per message content.
    pub max_message_chars: usize,

    /// Requests allowed per client key per window.
    pub rate_limit_requests: u32,

    /// Rate-limit window length in seconds.
    pub rate_limit_window_secs: u64,

    /// Upper bound on rate-limit records kept in memory.
    pub max_tracked_keys: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_message_chars: 2000,
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
            max_tracked_keys: 10_000,
        }
    }
}

impl LimitsConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing
    /// fields, then overlay the process environment.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        Ok(config.with_env(|name| std::env::var(name).ok()))
    }

    /// Overlay values taken from the environment via `lookup`.
    ///
    /// Empty variables count as unset.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(API_KEY_ENV) {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = non_empty(BASE_URL_ENV) {
            self.upstream.base_url = url;
        }
        self
    }

    /// Whether an upstream credential is available.
    pub fn has_credential(&self) -> bool {
        self.upstream.api_key.is_some()
    }
}
