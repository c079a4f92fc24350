use std::collections::HashSet;

use chat_sync::common::{CorrelationToken, DeliveryStatus, Direction, MessageId, MessageRecord};
use chat_sync::config;
use chat_sync::network::{HttpHistorySource, TcpConnector};
use chat_sync::session::{ConversationManager, SessionDeps, SessionHandle, SessionSettings};
use chat_sync::{ChatError, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(
    name = "chat_sync",
    version,
    about = "Terminal client for one-to-one chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Local participant id (overrides config and CHAT_LOCAL_PARTICIPANT)
    #[arg(long)]
    local: Option<String>,
    /// Display name announced on join
    #[arg(long)]
    name: Option<String>,
    /// Participant to chat with
    remote: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    Open(String),
    Resend(CorrelationToken),
    Cancel(CorrelationToken),
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let (command, argument) = match line.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };
    match (command, argument) {
        ("/quit", _) => Input::Quit,
        ("/open" | "/resend" | "/cancel", "") => Input::Empty,
        ("/open", remote) => Input::Open(remote.to_string()),
        ("/resend", token) => Input::Resend(CorrelationToken::from(token)),
        ("/cancel", token) => Input::Cancel(CorrelationToken::from(token)),
        _ => Input::Message(line.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env();
    if let Some(local) = cli.local {
        app_config.local_participant = local;
    }
    if let Some(name) = cli.name {
        app_config.display_name = Some(name);
    }
    app_config.validate()?;

    let history = HttpHistorySource::new(
        app_config.history_base_url.clone(),
        app_config.history_timeout(),
    )?;
    let connector = TcpConnector::new(app_config.channel_addr.clone());
    let mut manager = ConversationManager::new(
        app_config.local_participant.clone(),
        SessionDeps::new(history, connector),
        SessionSettings::from(&app_config),
    );

    let mut printer = spawn_printer(manager.enter(cli.remote).await);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => continue,
            Input::Open(remote) => {
                printer.abort();
                printer = spawn_printer(manager.enter(remote).await);
            }
            input => {
                let Some(session) = manager.current() else {
                    continue;
                };
                let outcome = match input {
                    Input::Message(text) => session.send(text).await.map(|_| ()),
                    Input::Resend(token) => session.resend(token).await,
                    Input::Cancel(token) => session.cancel(token).await,
                    _ => Ok(()),
                };
                report(outcome);
            }
        }
    }

    printer.abort();
    manager.exit().await;
    Ok(())
}

fn report(outcome: Result<()>) {
    match outcome {
        Ok(()) => {}
        Err(ChatError::ChannelNotReady { retryable: true }) => {
            eprintln!("Not connected yet, try again shortly");
        }
        Err(ChatError::ChannelNotReady { retryable: false }) => {
            eprintln!("Connection lost; reopen the conversation with /open");
        }
        Err(err) => eprintln!("{err}"),
    }
}

/// Prints each record once per status it reaches.
fn spawn_printer(session: &SessionHandle) -> JoinHandle<()> {
    let mut updates = session.subscribe();
    println!("--- {} ---", session.id());

    tokio::spawn(async move {
        let mut shown: HashSet<(MessageId, DeliveryStatus)> = HashSet::new();
        while updates.changed().await.is_ok() {
            let records = updates.borrow_and_update().clone();
            for record in records {
                if shown.insert((record.id.clone(), record.status)) {
                    println!("{}", render(&record));
                }
            }
        }
    })
}

fn render(record: &MessageRecord) -> String {
    let time = DateTime::<Utc>::from_timestamp_millis(record.timestamp)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let arrow = match record.direction {
        Direction::Outgoing => ">",
        Direction::Incoming => "<",
    };
    match (record.status, record.correlation_token.as_ref()) {
        (DeliveryStatus::Optimistic, Some(token)) => {
            format!("[{time}] {arrow} {}: {} (sending, token {token})", record.author, record.text)
        }
        _ => format!("[{time}] {arrow} {}: {}", record.author, record.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_plain_messages() {
        assert_eq!(parse_input("  "), Input::Empty);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/open bob"), Input::Open("bob".to_string()));
        assert_eq!(parse_input("/open"), Input::Empty);
        assert_eq!(
            parse_input("/resend abc"),
            Input::Resend(CorrelationToken::from("abc"))
        );
        assert_eq!(
            parse_input("/cancel abc"),
            Input::Cancel(CorrelationToken::from("abc"))
        );
        assert_eq!(
            parse_input("hello there"),
            Input::Message("hello there".to_string())
        );
    }
}
