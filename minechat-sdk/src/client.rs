//! Client entry point.
//!
//! [`connect`] replays stored history to the display, starts the history
//! recorder and then hands over to the [`Supervisor`], all in one spawned
//! task. The caller gets a [`ClientHandle`] for outgoing messages and
//! shutdown, a receiver of [`Event`]s, and the task's `JoinHandle`, which
//! resolves once the client has stopped for good.
//!
//! ```rust,no_run
//! use minechat_sdk::auth::Token;
//! use minechat_sdk::client::{self, ClientConfig};
//! use minechat_sdk::event::Event;
//!
//! # async fn example() -> Result<(), minechat_sdk::Error> {
//! let mut config = ClientConfig::default();
//! config.session.token = Some(Token::new("0123456789abcdef"));
//!
//! let (handle, mut events, task) = client::connect(config);
//! handle.send("Hello, chat!")?;
//! while let Some(event) = events.recv().await {
//!     if let Event::Message(line) = event {
//!         println!("{line}");
//!     }
//! }
//! task.await.map_err(|_| minechat_sdk::Error::Closed)?
//! # }
//! ```

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connect::{Connector, TcpConnector};
use crate::error::Error;
use crate::event::Event;
use crate::group::TaskGroup;
use crate::history::{self, HistoryConfig};
use crate::reader::Inbound;
use crate::sender;
use crate::supervisor::{SessionConfig, SessionState, Supervisor};

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub session: SessionConfig,
    /// `None` runs without any history file.
    pub history: Option<HistoryConfig>,
}

/// A handle to a running client. Cheap to clone. Once every handle is
/// dropped the outbound queue closes and the client shuts down.
#[derive(Clone)]
pub struct ClientHandle {
    outbox: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl ClientHandle {
    /// Queue a chat message. Empty messages are accepted and ignored.
    pub fn send(&self, text: impl Into<String>) -> Result<(), Error> {
        self.outbox.send(text.into()).map_err(|_| Error::Closed)
    }

    /// Ask the client to stop. Channels are closed and no reconnect follows.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Current supervisor state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch supervisor state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// Start a client over plain TCP.
pub fn connect(
    config: ClientConfig,
) -> (
    ClientHandle,
    mpsc::UnboundedReceiver<Event>,
    JoinHandle<Result<(), Error>>,
) {
    connect_with_connector(config, TcpConnector)
}

/// Start a client using `connector` to open channels.
pub fn connect_with_connector<C: Connector>(
    config: ClientConfig,
    connector: C,
) -> (
    ClientHandle,
    mpsc::UnboundedReceiver<Event>,
    JoinHandle<Result<(), Error>>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outbox_tx, outbox) = sender::outbox();
    let shutdown = CancellationToken::new();

    let (history_tx, history_rx) = match config.history {
        Some(_) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    let inbound = Inbound {
        display: event_tx.clone(),
        history: history_tx,
    };
    let supervisor = Supervisor::with_connector(config.session, connector, inbound, outbox);

    let handle = ClientHandle {
        outbox: outbox_tx,
        shutdown: shutdown.clone(),
        state: supervisor.subscribe(),
    };

    let task = tokio::spawn(run_client(
        supervisor,
        shutdown,
        config.history.zip(history_rx),
        event_tx,
    ));

    (handle, event_rx, task)
}

async fn run_client<C: Connector>(
    supervisor: Supervisor<C>,
    shutdown: CancellationToken,
    history: Option<(HistoryConfig, mpsc::UnboundedReceiver<String>)>,
    events: mpsc::UnboundedSender<Event>,
) -> Result<(), Error> {
    let mut group = TaskGroup::default();
    if let Some((history, lines)) = history {
        for line in history::replay(&history).await? {
            let _ = events.send(Event::Message(line));
        }
        group.spawn("history", history::record(history, lines));
    }
    drop(events);

    group.spawn("session", supervisor.run(shutdown));
    let result = group.join().await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "client stopped");
    }
    result
}
