//! Session supervisor: the reconnect loop.
//!
//! ```text
//! idle → opening → authenticating → active → closing ─┬→ opening
//!                                                     └→ terminated
//! ```
//!
//! One cycle opens both channels, logs in on the send channel and then runs
//! the reader, sender, keep-alive probe and watchdog as a single
//! [`TaskGroup`]. The first of them to fail takes the others down with it; a
//! half-alive session is never kept. Once every member has stopped both
//! channels are closed and, unless the token was rejected or a shutdown was
//! requested, the next cycle starts straight away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::auth::{self, Token};
use crate::channel::Channel;
use crate::connect::{self, Connector, RetryPolicy, TcpConnector};
use crate::error::{ConnectionError, CycleError, Error};
use crate::event::{ChannelKind, ConnectionState, Event};
use crate::group::TaskGroup;
use crate::reader::{self, Inbound};
use crate::sender::{self, Outbox};
use crate::watchdog::{self, KeepAlive, SharedWriter, Watchdog};

/// Default chat server.
pub const DEFAULT_HOST: &str = "minechat.dvmn.org";
pub const DEFAULT_READ_PORT: u16 = 5000;
pub const DEFAULT_SEND_PORT: u16 = 5050;

/// Everything one session needs to know about the server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    /// Port of the broadcast (read-only) channel.
    pub read_port: u16,
    /// Port of the authenticated (send) channel.
    pub send_port: u16,
    /// Without a token the handshake is skipped and the send channel is
    /// only held open: nothing is written to it, outgoing messages are
    /// dropped and liveness rests on the read channel alone.
    pub token: Option<Token>,
    pub retry: RetryPolicy,
    /// Silence tolerated before the connection is declared dead. Keep it
    /// above `keep_alive.interval`: on a quiet server the probe echoes are
    /// the only traffic, and a shorter timeout expires between them and
    /// forces a reconnect every time.
    pub watchdog_timeout: Duration,
    /// Deadline for the whole login exchange.
    pub handshake_timeout: Duration,
    /// `None` disables the keep-alive probe. It only runs on a logged-in
    /// session.
    pub keep_alive: Option<KeepAlive>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            read_port: DEFAULT_READ_PORT,
            send_port: DEFAULT_SEND_PORT,
            token: None,
            retry: RetryPolicy::default(),
            watchdog_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            keep_alive: Some(KeepAlive::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Authenticating,
    Active,
    Closing,
    Terminated,
}

/// Emits `Closed` for both channels when dropped, however the cycle ended.
struct ClosedOnExit<'a>(&'a Inbound);

impl Drop for ClosedOnExit<'_> {
    fn drop(&mut self) {
        for channel in [ChannelKind::Read, ChannelKind::Send] {
            let _ = self
                .0
                .display
                .send(Event::status(channel, ConnectionState::Closed));
        }
    }
}

pub struct Supervisor<C: Connector = TcpConnector> {
    config: SessionConfig,
    connector: C,
    inbound: Inbound,
    outbox: Outbox,
    state: watch::Sender<SessionState>,
}

impl Supervisor<TcpConnector> {
    pub fn new(config: SessionConfig, inbound: Inbound, outbox: Outbox) -> Self {
        Self::with_connector(config, TcpConnector, inbound, outbox)
    }
}

impl<C: Connector> Supervisor<C> {
    pub fn with_connector(
        config: SessionConfig,
        connector: C,
        inbound: Inbound,
        outbox: Outbox,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector,
            inbound,
            outbox,
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(?state, "session state");
        self.state.send_replace(state);
    }

    fn emit(&self, event: Event) {
        let _ = self.inbound.display.send(event);
    }

    /// Run sessions until the token is rejected or `shutdown` fires.
    ///
    /// Connection faults never surface here; they only show up as `Closed`
    /// status events followed by a fresh attempt.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let outcome = {
                let _closed = ClosedOnExit(&self.inbound);
                self.emit(Event::status(ChannelKind::Read, ConnectionState::Initiated));
                self.emit(Event::status(ChannelKind::Send, ConnectionState::Initiated));
                self.cycle(&shutdown).await
            };

            match outcome {
                CycleError::Connection(e) if !shutdown.is_cancelled() => {
                    tracing::warn!(attempt, error = %e, "connection lost, reconnecting");
                }
                CycleError::Connection(_) | CycleError::Shutdown => {
                    self.set_state(SessionState::Terminated);
                    tracing::info!(attempt, "session stopped");
                    return Ok(());
                }
                CycleError::InvalidToken => {
                    self.set_state(SessionState::Terminated);
                    return Err(Error::InvalidToken);
                }
            }
        }
    }

    /// One full cycle. Always ends with a reason; by the time it returns every
    /// task it started has stopped and both channels are closed.
    async fn cycle(&self, shutdown: &CancellationToken) -> CycleError {
        let config = &self.config;
        self.set_state(SessionState::Opening);

        let open_one = move |port: u16, kind: ChannelKind| async move {
            let channel =
                connect::open(&self.connector, &config.host, port, &config.retry, kind).await;
            self.emit(Event::status(kind, ConnectionState::Established));
            channel
        };
        let (receive, send) = tokio::select! {
            biased;
            () = shutdown.cancelled() => return CycleError::Shutdown,
            pair = async {
                tokio::join!(
                    open_one(config.read_port, ChannelKind::Read),
                    open_one(config.send_port, ChannelKind::Send),
                )
            } => pair,
        };

        let (liveness, liveness_events) = watchdog::liveness_channel();
        let Channel {
            reader: mut send_reader,
            writer: mut send_writer,
            ..
        } = send;

        if let Some(token) = &config.token {
            self.set_state(SessionState::Authenticating);
            let handshake = time::timeout(
                config.handshake_timeout,
                auth::authorize(&mut send_reader, &mut send_writer, token, &liveness),
            );
            let nickname = tokio::select! {
                biased;
                () = shutdown.cancelled() => return CycleError::Shutdown,
                result = handshake => match result {
                    Ok(Ok(nickname)) => nickname,
                    Ok(Err(e)) => return e,
                    Err(_) => {
                        return ConnectionError::HandshakeTimeout(config.handshake_timeout).into();
                    }
                },
            };
            if let Some(nickname) = nickname {
                self.emit(Event::NicknameReceived(nickname));
            }
        }

        self.set_state(SessionState::Active);
        let Channel {
            reader: receive_reader,
            writer: mut receive_writer,
            ..
        } = receive;
        let send_writer: SharedWriter<_> = Arc::new(Mutex::new(send_writer));

        let mut group = TaskGroup::with_parent(shutdown);
        group.spawn(
            "reader",
            reader::run(receive_reader, self.inbound.clone(), liveness.clone()),
        );
        // Without a login the send channel stays silent: the server would
        // take any line there, keep-alives included, as a token or a sign-up.
        let idle_send_reader = match (&config.token, &config.keep_alive) {
            (Some(_), Some(keep_alive)) => {
                group.spawn(
                    "sender",
                    sender::run(send_writer.clone(), self.outbox.clone(), liveness.clone()),
                );
                group.spawn(
                    "keepalive",
                    watchdog::ping_pong(
                        send_writer.clone(),
                        send_reader,
                        liveness.clone(),
                        keep_alive.clone(),
                    ),
                );
                None
            }
            (Some(_), None) => {
                group.spawn(
                    "sender",
                    sender::run(send_writer.clone(), self.outbox.clone(), liveness.clone()),
                );
                Some(send_reader)
            }
            (None, _) => {
                group.spawn("sender", sender::discard(self.outbox.clone()));
                Some(send_reader)
            }
        };
        group.spawn(
            "watchdog",
            Watchdog::new(config.watchdog_timeout).run(liveness_events),
        );
        drop(liveness);

        let result = group.join().await;

        self.set_state(SessionState::Closing);
        receive_writer.close().await;
        send_writer.lock().await.close().await;
        drop(idle_send_reader);
        tracing::debug!("both channels closed");

        match result {
            Err(e) => e,
            Ok(()) => CycleError::Shutdown,
        }
    }
}
