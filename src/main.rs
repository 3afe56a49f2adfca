use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use design_assist::adapter::{EventHub, FanoutAdapter, TerminalAdapter, UiAdapter, serve_relay};
use design_assist::adapter::terminal::render_snapshot;
use design_assist::client::{HttpSessionClient, SessionApi};
use design_assist::config::ClientConfig;
use design_assist::repl::{self, Command};
use design_assist::session::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_tracing();

    let verbose = std::env::args().skip(1).any(|a| a == "-v" || a == "--verbose");

    let config = ClientConfig::from_env().context("invalid configuration")?;

    eprintln!("🏛  Design Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Server: {}", config.base_url);

    let api: Arc<dyn SessionApi> =
        Arc::new(HttpSessionClient::new(&config).context("failed to build HTTP client")?);

    // ── Adapters ────────────────────────────────────────────────────────
    let hub = EventHub::new();
    let adapter = FanoutAdapter::new()
        .with(Arc::new(TerminalAdapter::new(verbose)) as Arc<dyn UiAdapter>)
        .with(hub.clone() as Arc<dyn UiAdapter>);

    if let Some(port) = config.relay_port {
        let (addr, _relay) = serve_relay(hub.clone(), SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .with_context(|| format!("failed to start relay on port {port}"))?;
        eprintln!("   Relay: ws://{addr}/ws");
    }

    let orchestrator = Orchestrator::from_config(api, Arc::new(adapter), &config);

    eprintln!("   Type /help for commands.\n");
    eprint!("> ");

    let mut commands = std::pin::pin!(repl::stdin_commands());
    while let Some(command) = commands.next().await {
        // Failures are already rendered by the terminal adapter
        match command {
            Command::Start => {
                let _ = orchestrator.start_session().await;
            }
            Command::Resume(path) => {
                let _ = orchestrator.resume_session(&path).await;
            }
            Command::Sessions => {
                if let Ok(sessions) = orchestrator.list_sessions().await {
                    if sessions.is_empty() {
                        println!("No stored sessions.");
                    }
                    for path in sessions {
                        println!("  {path}");
                    }
                }
            }
            Command::Skip => {
                let _ = orchestrator.skip_stage().await;
            }
            Command::State => {
                if let Ok(state) = orchestrator.refresh_state().await {
                    println!("{}", render_snapshot(&state));
                }
            }
            Command::Visualize => {
                eprintln!("Looking for visualizations...");
                let _ = orchestrator.refresh_visualizations().await;
            }
            Command::Help => println!("{}", repl::HELP),
            Command::Quit => break,
            Command::Chat(message) => {
                let _ = orchestrator.send_chat(&message).await;
            }
            Command::Unknown(word) => eprintln!("Unknown command {word}. Type /help."),
        }
        eprint!("> ");
    }

    orchestrator.dispose();
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("DESIGN_ASSIST_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "design-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
