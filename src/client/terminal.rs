//! Line-based terminal front-end over [`ChatSession`].
//!
//! `/clear` wipes the conversation, `/quit` exits. Ctrl-C while a reply is
//! streaming stops it; at the prompt it exits.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::session::{ChatSession, SendOutcome, SessionOptions};
use crate::client::transport::{HttpRelayTransport, RelayTransport};

/// Run an interactive chat against the relay at `url`.
pub async fn run_chat(url: &str, model: &str) -> anyhow::Result<()> {
    let session = ChatSession::new(
        HttpRelayTransport::new(url),
        SessionOptions {
            model: model.to_string(),
            ..Default::default()
        },
    );

    println!("Chatting with {} via {url}. /clear resets, /quit exits.", session.model());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                session.clear();
                println!("(conversation cleared)");
            }
            text => stream_to_stdout(&session, text).await?,
        }
    }

    Ok(())
}

async fn stream_to_stdout<T: RelayTransport>(
    session: &ChatSession<T>,
    text: &str,
) -> anyhow::Result<()> {
    let mut updates = session.subscribe();
    let mut shown = String::new();

    let send = session.send(text);
    tokio::pin!(send);

    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            Ok(()) = updates.changed() => show_progress(session, &mut shown)?,
            _ = tokio::signal::ctrl_c() => {
                session.stop();
            }
        }
    };

    match outcome {
        SendOutcome::Completed => {
            show_progress(session, &mut shown)?;
            println!();
        }
        SendOutcome::Cancelled => println!(" [stopped]"),
        SendOutcome::Failed(_) => {
            if let Some(reply) = session.last_assistant_reply() {
                println!("\n{reply}");
            }
        }
        SendOutcome::Ignored => {}
    }
    Ok(())
}

/// Print whatever part of the current reply has not been shown yet.
fn show_progress<T: RelayTransport>(
    session: &ChatSession<T>,
    shown: &mut String,
) -> std::io::Result<()> {
    let Some(reply) = session.last_assistant_reply() else {
        return Ok(());
    };
    if let Some(fresh) = reply.strip_prefix(shown.as_str()) {
        if !fresh.is_empty() {
            let mut stdout = std::io::stdout();
            stdout.write_all(fresh.as_bytes())?;
            stdout.flush()?;
            shown.push_str(fresh);
        }
    }
    Ok(())
}
