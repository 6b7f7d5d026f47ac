//! Command-line and environment configuration.
//!
//! Every connection setting can come from a flag or a `CHAT_*` variable;
//! flags win. [`ChatArgs::resolve`] turns the raw arguments into the SDK's
//! [`ClientConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use minechat_sdk::Error;
use minechat_sdk::auth::Token;
use minechat_sdk::client::ClientConfig;
use minechat_sdk::connect::RetryPolicy;
use minechat_sdk::history::{HistoryConfig, HistoryPolicy};
use minechat_sdk::supervisor::{DEFAULT_HOST, DEFAULT_READ_PORT, DEFAULT_SEND_PORT, SessionConfig};
use minechat_sdk::watchdog::KeepAlive;

pub const DEFAULT_TOKEN_FILE: &str = "access_token.txt";
pub const DEFAULT_HISTORY_FILE: &str = "chat.history";

#[derive(Parser, Debug)]
#[command(name = "minechat", version, about = "Chat client for minechat servers")]
pub struct Cli {
    /// Verbose logging (same as RUST_LOG=minechat_sdk=debug,minechat=debug)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join the chat: print the broadcast, send lines typed on stdin
    Chat(ChatArgs),
    /// Create a new account and store its token
    Register(RegisterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Chat server host
    #[arg(long, env = "CHAT_SERVER", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the broadcast channel
    #[arg(long, env = "CHAT_PORT_READ", default_value_t = DEFAULT_READ_PORT)]
    pub read_port: u16,

    /// Port of the authenticated channel
    #[arg(long, env = "CHAT_PORT_SEND", default_value_t = DEFAULT_SEND_PORT)]
    pub send_port: u16,

    /// Where the account token is stored
    #[arg(long, env = "CHAT_TOKEN_FILE", default_value = DEFAULT_TOKEN_FILE)]
    pub token_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Account token (overrides the token file)
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Only listen; do not log in and ignore stdin
    #[arg(long)]
    pub read_only: bool,

    /// Chat history file
    #[arg(long, env = "CHAT_HISTORY_FILE", default_value = DEFAULT_HISTORY_FILE)]
    pub history: PathBuf,

    /// Run without a history file
    #[arg(long, conflicts_with = "history_required")]
    pub no_history: bool,

    /// Stop instead of continuing when the history file fails
    #[arg(long)]
    pub history_required: bool,

    /// Seconds of silence before the connection is considered dead
    #[arg(long, env = "CHAT_WATCHDOG_TIMEOUT", default_value_t = 5.0)]
    pub watchdog_timeout: f64,

    /// Disable the keep-alive probe on the send channel
    #[arg(long)]
    pub no_keepalive: bool,

    /// Seconds the server gets to answer a keep-alive probe
    #[arg(long, default_value_t = 5.0)]
    pub probe_timeout: f64,

    /// Seconds between keep-alive probes
    #[arg(long, default_value_t = 10.0)]
    pub probe_interval: f64,

    /// Immediate reconnects after a refused connection before backing off
    #[arg(long, default_value_t = 1)]
    pub retries: u32,

    /// Seconds between reconnects once the immediate ones are used up
    #[arg(long, default_value_t = 3.0)]
    pub backoff: f64,

    /// Seconds allowed for the whole login exchange
    #[arg(long, default_value_t = 10.0)]
    pub handshake_timeout: f64,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Preferred nickname
    pub name: String,

    /// Replace an existing token file
    #[arg(long)]
    pub force: bool,
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        anyhow::anyhow!("--{flag} must be a non-negative number of seconds, got {value}")
    })
}

/// Read the token file. A missing or empty file is [`Error::TokenNotFound`].
pub fn read_token(path: &Path) -> Result<Token, Error> {
    let not_found = |source| Error::TokenNotFound {
        path: path.to_path_buf(),
        source,
    };
    let token = Token::new(std::fs::read_to_string(path).map_err(not_found)?);
    if token.is_empty() {
        return Err(not_found(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "file is empty",
        )));
    }
    Ok(token)
}

/// A logged-in session whose probe interval is not shorter than the watchdog
/// timeout reconnects whenever the chat goes quiet.
pub fn keepalive_outpaces_watchdog(session: &SessionConfig) -> bool {
    session.token.is_some()
        && session
            .keep_alive
            .as_ref()
            .is_some_and(|keep_alive| keep_alive.interval >= session.watchdog_timeout)
}

impl ChatArgs {
    fn token(&self) -> Result<Option<Token>, Error> {
        if self.read_only {
            return Ok(None);
        }
        match self.token.as_deref().map(Token::new) {
            Some(token) if !token.is_empty() => Ok(Some(token)),
            _ => read_token(&self.server.token_file).map(Some),
        }
    }

    pub fn resolve(&self) -> anyhow::Result<ClientConfig> {
        let keep_alive = if self.no_keepalive {
            None
        } else {
            Some(KeepAlive {
                timeout: seconds(self.probe_timeout, "probe-timeout")?,
                interval: seconds(self.probe_interval, "probe-interval")?,
            })
        };
        let session = SessionConfig {
            host: self.server.host.clone(),
            read_port: self.server.read_port,
            send_port: self.server.send_port,
            token: self.token()?,
            retry: RetryPolicy {
                immediate_retries: self.retries,
                backoff: seconds(self.backoff, "backoff")?,
            },
            watchdog_timeout: seconds(self.watchdog_timeout, "watchdog-timeout")?,
            handshake_timeout: seconds(self.handshake_timeout, "handshake-timeout")?,
            keep_alive,
        };
        if keepalive_outpaces_watchdog(&session) {
            tracing::warn!(
                watchdog_timeout = self.watchdog_timeout,
                probe_interval = self.probe_interval,
                "probe interval not below watchdog timeout, quiet chats will reconnect"
            );
        }
        let history = (!self.no_history).then(|| HistoryConfig {
            path: self.history.clone(),
            policy: if self.history_required {
                HistoryPolicy::Required
            } else {
                HistoryPolicy::BestEffort
            },
        });
        Ok(ClientConfig { session, history })
    }
}
