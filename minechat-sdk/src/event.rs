//! Events emitted by the client for the display layer to consume.

use std::fmt;

/// Which of the two server connections an event or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Broadcast channel; the client only reads from it.
    Read,
    /// Authenticated channel; messages, probes and the handshake go here.
    Send,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Read => f.write_str("read"),
            ChannelKind::Send => f.write_str("send"),
        }
    }
}

/// Lifecycle of one channel within a reconnect attempt.
///
/// Every attempt emits `Initiated` and, whatever happens, `Closed` exactly
/// once per channel. `Established` only follows a successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initiated,
    Established,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Initiated => f.write_str("connecting"),
            ConnectionState::Established => f.write_str("connected"),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// Events that the SDK emits to the consumer (terminal, GUI, bot, etc.)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A chat line, either replayed from history or received live.
    Message(String),

    /// A channel changed state.
    Status {
        channel: ChannelKind,
        state: ConnectionState,
    },

    /// The server accepted our token and told us our display name.
    NicknameReceived(String),
}

impl Event {
    pub(crate) fn status(channel: ChannelKind, state: ConnectionState) -> Self {
        Event::Status { channel, state }
    }
}
