//! REPL input: parses stdin lines into commands.

use futures::Stream;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "\
Commands:
  /start            start a new design session
  /resume <path>    resume a stored session
  /sessions         list stored sessions
  /skip             skip the current stage
  /state            refresh and show the session state
  /vis              look for visualizations
  /help             show this help
  /quit             exit
Anything else is sent to the assistant as a chat message.";

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Resume(String),
    Sessions,
    Skip,
    State,
    Visualize,
    Help,
    Quit,
    Chat(String),
    Unknown(String),
}

impl Command {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Chat(line.to_string()));
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "/start" | "/new" => Command::Start,
            // Blank paths are left for the orchestrator to reject
            "/resume" => Command::Resume(rest.to_string()),
            "/sessions" | "/list" => Command::Sessions,
            "/skip" => Command::Skip,
            "/state" => Command::State,
            "/vis" => Command::Visualize,
            "/help" | "/?" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

/// Stdin as a stream of non-blank commands. Ends on EOF.
pub fn stdin_commands() -> impl Stream<Item = Command> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let reader = BufReader::new(tokio::io::stdin());
        let mut lines = reader.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(command) = Command::parse(&line) else {
                        continue;
                    };
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|cmd| (cmd, rx)) })
}
