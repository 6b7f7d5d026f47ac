//! Token login and account registration on the send channel.
//!
//! ## Login
//!
//! ```text
//! S: <greeting>
//! C: <token>
//! S: {"nickname": "...", ...}   or   null
//! ```
//!
//! `null` means the server does not know the token. That is fatal for the
//! whole client: the same token will be rejected on every reconnect.
//!
//! ## Registration
//!
//! ```text
//! S: <greeting>
//! C: <empty line>
//! S: <name prompt>
//! C: <preferred name>
//! S: {"nickname": "...", "account_hash": "..."}
//! ```

use std::fmt;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::channel::{LineReader, LineWriter};
use crate::codec;
use crate::error::{ConnectionError, CycleError};
use crate::watchdog::{LivenessKind, LivenessSender};

/// Account credential. Forwarded to the server verbatim apart from trimming
/// surrounding whitespace.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(token.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Outcome of the login exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub verified: bool,
    pub nickname: Option<String>,
}

#[derive(Deserialize)]
struct Account {
    nickname: Option<String>,
}

/// Server reply to a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Registration {
    pub nickname: String,
    /// The new account's token.
    pub account_hash: String,
}

fn parse<T: serde::de::DeserializeOwned>(line: String) -> Result<T, ConnectionError> {
    serde_json::from_str(&line)
        .map_err(|source| ConnectionError::MalformedResponse { line, source })
}

/// Run the login exchange. A rejected token is `Ok` with `verified: false`;
/// deciding what that means is up to the caller.
pub async fn authenticate<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
    token: &Token,
) -> Result<Authorization, ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let greeting = reader.read_line().await?;
    tracing::debug!(%greeting, "server greeting");
    writer.write_frame(&codec::encode_line(token.as_str())).await?;
    let response = reader.read_line().await?;

    Ok(match parse::<Option<Account>>(response)? {
        Some(account) => Authorization {
            verified: true,
            nickname: account.nickname,
        },
        None => Authorization {
            verified: false,
            nickname: None,
        },
    })
}

/// Log in, reporting progress to the watchdog. Rejection becomes
/// [`CycleError::InvalidToken`]. Returns the nickname the server assigned,
/// if it sent one.
pub async fn authorize<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
    token: &Token,
    liveness: &LivenessSender,
) -> Result<Option<String>, CycleError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    liveness.notify(LivenessKind::AuthStarted);
    let authorization = authenticate(reader, writer, token).await?;
    if !authorization.verified {
        tracing::error!("unknown token: check it or register again");
        return Err(CycleError::InvalidToken);
    }
    liveness.notify(LivenessKind::AuthDone);
    tracing::info!(
        nickname = authorization.nickname.as_deref().unwrap_or("<none>"),
        "authorized"
    );
    Ok(authorization.nickname)
}

/// Register a new account under (roughly) `name`. The server may adjust the
/// name; the returned [`Registration`] has the final one.
pub async fn register<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
    name: &str,
) -> Result<Registration, ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    reader.read_line().await?;
    writer.write_frame(codec::PROBE).await?;
    let prompt = reader.read_line().await?;
    tracing::debug!(%prompt, "registration prompt");
    writer.write_frame(&codec::encode_line(&codec::sanitize(name))).await?;
    let response = reader.read_line().await?;
    parse(response)
}
