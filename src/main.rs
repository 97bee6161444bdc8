//! llm-chat-relay binary: `serve` runs the relay, `chat` talks to one.

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use llm_chat_relay::client::terminal::run_chat;
use llm_chat_relay::config::{Cli, Command, Config, API_KEY_ENV};
use llm_chat_relay::rate_limit::FixedWindowLimiter;
use llm_chat_relay::server::relay_api::{build_router, AppState};
use llm_chat_relay::upstream::openai::OpenAiBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llm_chat_relay=debug,tower_http=debug"
    } else {
        "llm_chat_relay=info,tower_http=info"
    };

    // Logs go to stderr so the chat front-end owns stdout.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Command::Serve { config, listen } => serve(&config, listen).await,
        Command::Chat { url, model } => run_chat(&url, &model).await,
    }
}

async fn serve(config_path: &std::path::Path, listen: Option<String>) -> anyhow::Result<()> {
    info!("llm-chat-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(config_path)?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }

    if !config.has_credential() {
        bail!("{API_KEY_ENV} is not set; refusing to start");
    }

    info!(
        upstream = %config.upstream.base_url,
        default_model = %config.upstream.default_model,
        max_messages = config.limits.max_messages,
        max_message_chars = config.limits.max_message_chars,
        rate_limit = config.limits.rate_limit_requests,
        window_secs = config.limits.rate_limit_window_secs,
        "Configuration loaded"
    );

    let config = Arc::new(config);
    let backend = Arc::new(OpenAiBackend::new(&config.upstream)?);
    let limiter = Arc::new(FixedWindowLimiter::from_limits(&config.limits));

    // Build application state.
    let state = Arc::new(AppState::new(backend, limiter, config.clone()));

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
