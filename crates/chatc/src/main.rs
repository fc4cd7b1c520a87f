#![forbid(unsafe_code)]

use chatc::channel::WsChannel;
use chatc::config::{endpoint_from_page, load_config, Cli, Commands, Endpoint};
use chatc::{ChatClient, ChatError, ClientEvent, DisplayRecord, RecordKind, SessionState};

use chrono::Local;
use clap::Parser;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

#[derive(Clone, Copy)]
struct Style {
    color: bool,
}

impl Style {
    fn detect() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
        }
    }

    const fn pick(self, code: &'static str) -> &'static str {
        if self.color {
            code
        } else {
            ""
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

// ── Transcript rendering ────────────────────────────────────────────

fn format_time(record: &DisplayRecord) -> String {
    record
        .timestamp()
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string()
}

fn render_record(record: &DisplayRecord, style: Style) {
    let (reset, bold, dim) = (style.pick(RESET), style.pick(BOLD), style.pick(DIM));
    let time = format_time(record);
    match record.kind() {
        RecordKind::Sent => {
            let green = style.pick(GREEN);
            println!("{dim}{time}{reset} {green}you{reset}  {}", record.text());
        }
        RecordKind::Received => {
            let cyan = style.pick(CYAN);
            println!(
                "{dim}{time}{reset} {cyan}@{}{reset}  {}",
                record.user(),
                record.text()
            );
        }
        RecordKind::SystemJoin => {
            println!("{dim}{time} - @{} joined{reset}", record.user());
        }
        RecordKind::SystemLeave => {
            println!("{dim}{time} - @{} left{reset}", record.user());
        }
        RecordKind::ConnectionLost => {
            let red = style.pick(RED);
            println!(
                "{bold}{red}Connection lost with server.{reset} {dim}({}){reset}",
                record.text()
            );
        }
        RecordKind::Unsupported => {}
    }
}

fn render_event(event: &ClientEvent, endpoint: &str, style: Style) {
    match event {
        ClientEvent::Record(record) => render_record(record, style),
        ClientEvent::StateChanged(SessionState::Open) => {
            let (reset, dim) = (style.pick(RESET), style.pick(DIM));
            eprintln!("{dim}connected to {endpoint}{reset}");
        }
        ClientEvent::StateChanged(state) => debug!(%state, "state changed"),
        ClientEvent::Dropped(e) => debug!(error = %e, "frame dropped"),
    }
}

// ── Commands ────────────────────────────────────────────────────────

fn resolve_endpoint(cli: &Cli) -> anyhow::Result<(Endpoint, Duration)> {
    let mut config = load_config(cli.config.as_deref())?;

    let page_endpoint = cli.page.as_deref().map(endpoint_from_page).transpose()?;
    if let Some(ref endpoint) = page_endpoint {
        config.user = endpoint.user.clone();
    }
    if let Some(ref server) = cli.server {
        config.server = server.clone();
    }
    if let Some(ref user) = cli.user {
        config.user = user.clone();
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let endpoint = page_endpoint.unwrap_or_else(|| config.endpoint());
    Ok((endpoint, Duration::from_secs(config.keepalive.interval_s)))
}

fn build_client(endpoint: &Endpoint, keepalive: Duration) -> ChatClient<WsChannel> {
    let style = Style::detect();
    let mut client = ChatClient::new(
        WsChannel::new(keepalive),
        endpoint.url.clone(),
        endpoint.user.clone(),
    );
    let url = endpoint.url.clone();
    client.subscribe(move |event| render_event(event, &url, style));
    client
}

async fn run_join(endpoint: &Endpoint, keepalive: Duration) -> anyhow::Result<()> {
    let mut client = build_client(endpoint, keepalive);
    info!(url = %endpoint.url, user = %endpoint.user, "joining chat");
    if let Err(e) = client.start() {
        anyhow::bail!("could not start session: {e}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if client.current_state() == SessionState::Closed {
            break;
        }
        tokio::select! {
            event = client.next_channel_event() => client.handle_next_event(event),

            line = lines.next_line() => {
                match line? {
                    Some(line) => match client.send(&line) {
                        Ok(()) | Err(ChatError::EmptyMessage) => {}
                        Err(e) => warn!(error = %e, "message not sent"),
                    },
                    None => {
                        if let Err(e) = client.close() {
                            debug!(error = %e, "close on stdin EOF");
                        }
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                if let Err(e) = client.close() {
                    debug!(error = %e, "close on shutdown");
                }
                break;
            }
        }
    }

    client.channel_mut().join().await;
    Ok(())
}

async fn run_say(endpoint: &Endpoint, keepalive: Duration, message: &str) -> anyhow::Result<()> {
    let mut client = build_client(endpoint, keepalive);
    client
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("could not connect to {}: {e}", endpoint.url))?;
    client.send(message)?;
    client.close()?;
    client.channel_mut().join().await;
    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider - may already be installed or unsupported platform");
    }

    let cli = Cli::parse();

    init_tracing(&cli)?;

    let (endpoint, keepalive) = resolve_endpoint(&cli)?;

    match &cli.command {
        Commands::Join => run_join(&endpoint, keepalive).await,
        Commands::Say { message } => run_say(&endpoint, keepalive, message).await,
    }
}
