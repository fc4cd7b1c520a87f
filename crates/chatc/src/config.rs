use chat_common::types::{PAGE_USER_PATH, WS_USER_PATH};
use chat_common::is_valid_identity;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio_tungstenite::tungstenite::http::Uri;

/// CLI interface for the chat client.
#[derive(Parser)]
#[command(name = "chatc", about = "Chat relay transcript client")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Relay base URL override (`ws://` or `wss://`).
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Identity to join as.
    #[arg(long, short = 'u', global = true)]
    pub user: Option<String>,

    /// Chat page URL (`http(s)://host/user/<name>`); derives server and user.
    #[arg(long, global = true, conflicts_with_all = ["server", "user"])]
    pub page: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Join the chat: stdin lines are sent, the transcript is printed.
    Join,
    /// Connect, send one message, and leave.
    Say {
        /// Message content to send.
        message: String,
    },
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:5000`.
    pub server: String,
    /// Identity to join as.
    pub user: String,
    /// WebSocket keepalive ping settings.
    pub keepalive: KeepaliveConfig,
}

/// WebSocket keepalive settings.
#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    /// Interval between keepalive pings, in seconds.
    pub interval_s: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { interval_s: 30 }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "ws://127.0.0.1:5000".to_string(),
            user: String::new(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// Resolved connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full WebSocket URL.
    pub url: String,
    /// Identity embedded in the URL.
    pub user: String,
}

impl ClientConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.is_empty() {
            return Err("server URL must not be empty".to_string());
        }
        if !(self.server.starts_with("ws://") || self.server.starts_with("wss://")) {
            return Err(format!(
                "server URL must start with ws:// or wss://, got: {}",
                self.server
            ));
        }
        if self.user.is_empty() {
            return Err("user must not be empty (set --user or user in config)".to_string());
        }
        if !is_valid_identity(&self.user) {
            return Err(format!(
                "user must contain only ASCII letters and digits, got: {}",
                self.user
            ));
        }
        if self.keepalive.interval_s == 0 {
            return Err("keepalive.interval_s must be greater than 0".to_string());
        }
        Ok(())
    }

    /// WebSocket endpoint for the configured server and user.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            url: endpoint_url(&self.server, &self.user),
            user: self.user.clone(),
        }
    }
}

/// Joins a relay base URL and an identity into the WebSocket endpoint URL.
///
/// # Examples
///
/// ```
/// use chatc::config::endpoint_url;
/// assert_eq!(endpoint_url("ws://host:5000/", "alice"), "ws://host:5000/ws/user/alice");
/// ```
pub fn endpoint_url(server: &str, user: &str) -> String {
    format!("{}{WS_USER_PATH}{user}", server.trim_end_matches('/'))
}

/// Derives the WebSocket endpoint from a chat page URL.
///
/// `https` pages connect over `wss`, anything else over `ws`; the socket path
/// is the page path under `/ws`.
///
/// # Errors
///
/// Returns an error if the URL does not parse, has no host, or its path is
/// not `/user/<identity>` with a valid identity.
pub fn endpoint_from_page(page: &str) -> anyhow::Result<Endpoint> {
    let uri: Uri = page
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid page URL {page}: {e}"))?;
    let scheme = if uri.scheme_str() == Some("https") {
        "wss"
    } else {
        "ws"
    };
    let authority = uri
        .authority()
        .ok_or_else(|| anyhow::anyhow!("page URL has no host: {page}"))?;
    let path = uri.path();
    let user = path
        .strip_prefix(PAGE_USER_PATH)
        .ok_or_else(|| anyhow::anyhow!("page path must start with {PAGE_USER_PATH}: {path}"))?;
    if !is_valid_identity(user) {
        anyhow::bail!("page path does not name a valid user: {path}");
    }
    Ok(Endpoint {
        url: format!("{scheme}://{authority}/ws{path}"),
        user: user.to_string(),
    })
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();
    let mut builder = config::Config::builder()
        .set_default("server", defaults.server.as_str())?
        .set_default("user", defaults.user.as_str())?
        .set_default("keepalive.interval_s", defaults.keepalive.interval_s as i64)?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        // Platform-native config dir first, then ~/.config/chatc/.
        let native_path = dirs::config_dir().map(|d| d.join("chatc").join("config.toml"));
        let xdg_path =
            dirs::home_dir().map(|d| d.join(".config").join("chatc").join("config.toml"));

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(config::Environment::with_prefix("CHATC").separator("__"));

    let settings = builder.build()?;
    let config: ClientConfig = settings.try_deserialize()?;

    Ok(config)
}
