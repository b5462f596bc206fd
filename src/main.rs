use std::io::Write;
use std::sync::Arc;

use chat_session::{ChatError, ChatSession, MemoryCredentials, Role, SessionConfig, SessionEvent};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Session(#[from] ChatError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Interactive streaming chat client")]
struct Cli {
    #[arg(long, env = "CHAT_WS_URL")]
    ws_url: String,

    #[arg(long, env = "CHAT_HTTP_BASE_URL")]
    http_url: String,

    #[arg(long, env = "CHAT_TOKEN")]
    token: String,

    #[arg(long, env = "CHAT_USER_ID", default_value = "")]
    user_id: String,

    /// Load server-side history before the first prompt.
    #[arg(long)]
    history: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::new(cli.ws_url, cli.http_url).with_env_overrides();
    config.validate()?;
    let credentials = Arc::new(MemoryCredentials::with_login(cli.token, cli.user_id));
    let mut session = ChatSession::open(config, credentials)?;

    if cli.history {
        match session.load_history().await {
            Ok(count) => {
                print_history(&session).await?;
                eprintln!("-- {count} messages loaded");
            }
            Err(e) => eprintln!("! history: {e}"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&session, line.trim()).await? {
                    break;
                }
            }
            event = session.next_event() => {
                let Some(event) = event else { break };
                render(&event)?;
            }
        }
    }

    session.dispose().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(session: &ChatSession, line: &str) -> Result<bool, CliError> {
    match line {
        "/quit" | "/exit" => return Ok(false),
        "/reconnect" => session.reconnect()?,
        "/status" => {
            let snapshot = *session.status().borrow();
            println!("{}", serde_json::to_string(&snapshot)?);
        }
        "/history" => print_history(session).await?,
        "" => {}
        text => {
            // Rejections also arrive as a notice event.
            if let Err(e) = session.send_message(text).await {
                tracing::debug!(error = %e, "send rejected");
            }
        }
    }
    Ok(true)
}

fn render(event: &SessionEvent) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    match event {
        SessionEvent::Delta { text, .. } => write!(stdout, "{text}")?,
        SessionEvent::Complete { .. } => writeln!(stdout)?,
        SessionEvent::Error { message_id: Some(_), error } => {
            writeln!(stdout)?;
            eprintln!("! {}", describe(error));
        }
        SessionEvent::Error { message_id: None, error } => eprintln!("! {}", describe(error)),
        SessionEvent::Notice(text) => eprintln!("-- {text}"),
    }
    stdout.flush()?;
    Ok(())
}

/// `[E_CODE] message`, with a hint when trying again may help.
fn describe(error: &ChatError) -> String {
    let hint = match error {
        ChatError::ReconnectExhausted { .. } | ChatError::AuthRejected(_) => " (type /reconnect to retry)",
        _ if error.retryable() => " (retryable)",
        _ => "",
    };
    format!("[{}] {error}{hint}", error.error_code())
}

async fn print_history(session: &ChatSession) -> Result<(), CliError> {
    for message in session.messages().await? {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "bot",
        };
        println!("{who}> {}", message.content);
    }
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
