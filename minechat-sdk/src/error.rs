//! Error types.
//!
//! Three layers: [`ConnectionError`] is anything that means "this connection
//! is dead, start over"; [`CycleError`] is how a single reconnect cycle ended;
//! [`Error`] is what escapes the client and stops it for good.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::event::ChannelKind;

/// A transient fault. The supervisor answers every one of these with a full
/// reconnect.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("{channel} channel closed by the server")]
    Closed { channel: ChannelKind },

    #[error("{channel} channel I/O error: {source}")]
    Io {
        channel: ChannelKind,
        #[source]
        source: io::Error,
    },

    #[error("malformed handshake response {line:?}: {source}")]
    MalformedResponse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("keep-alive probe not echoed within {0:?}")]
    ProbeTimeout(Duration),

    #[error("no sign of life for {0:?}")]
    WatchdogExpired(Duration),
}

impl ConnectionError {
    pub(crate) fn io(channel: ChannelKind, source: io::Error) -> Self {
        ConnectionError::Io { channel, source }
    }
}

/// How one supervision cycle ended. Matched exhaustively by the supervisor:
/// `Connection` restarts, the rest terminate.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("server did not recognise the access token")]
    InvalidToken,

    #[error("shutdown requested")]
    Shutdown,
}

impl CycleError {
    /// Whether the supervisor should open a fresh session after this outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, CycleError::Connection(_))
    }
}

/// Fatal client errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown token: check it or register again")]
    InvalidToken,

    #[error("token file {} not readable: {source}", path.display())]
    TokenNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("history file {}: {source}", path.display())]
    History {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("client is no longer running")]
    Closed,
}
