//! Liveness tracking: the watchdog and the keep-alive probe.
//!
//! A TCP connection can stay "open" long after the server stopped talking.
//! Every task that sees real traffic publishes a [`LivenessEvent`]; the
//! [`Watchdog`] declares the connection dead once it has gone `timeout`
//! without one. The keep-alive probe makes sure an idle but healthy
//! connection still produces traffic.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{self, Instant};

use crate::channel::{LineReader, LineWriter};
use crate::codec;
use crate::error::{ConnectionError, CycleError};

/// What kind of evidence a liveness event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessKind {
    MessageReceived,
    MessageSent,
    ProbeAcked,
    AuthStarted,
    AuthDone,
}

impl fmt::Display for LivenessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LivenessKind::MessageReceived => "New message in chat",
            LivenessKind::MessageSent => "Message sent",
            LivenessKind::ProbeAcked => "Keep-alive echoed",
            LivenessKind::AuthStarted => "Prompt before auth",
            LivenessKind::AuthDone => "Authorization done",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessEvent {
    pub kind: LivenessKind,
    pub at: DateTime<Utc>,
}

pub type LivenessReceiver = mpsc::UnboundedReceiver<LivenessEvent>;

/// Producer side of the liveness stream. Cheap to clone; one per task.
#[derive(Debug, Clone)]
pub struct LivenessSender(mpsc::UnboundedSender<LivenessEvent>);

impl LivenessSender {
    /// Publish an event. Dropped silently once the watchdog is gone.
    pub fn notify(&self, kind: LivenessKind) {
        let _ = self.0.send(LivenessEvent {
            kind,
            at: Utc::now(),
        });
    }
}

pub fn liveness_channel() -> (LivenessSender, LivenessReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LivenessSender(tx), rx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Waiting,
    Expired,
}

/// Silence detector. Only ever consumes events; it never produces traffic.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    state: WatchdogState,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: WatchdogState::Waiting,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Wait on `events` until one deadline passes without any. Returns the
    /// failure to report; the watchdog is then `Expired`.
    pub async fn watch(&mut self, events: &mut LivenessReceiver) -> ConnectionError {
        loop {
            let deadline = Instant::now() + self.timeout;
            match time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => {
                    let at = event.at.timestamp();
                    tracing::debug!("[{at}] Connection is alive. {}", event.kind);
                }
                Ok(None) => {
                    // No producers left: nothing can reset us before the deadline.
                    time::sleep_until(deadline).await;
                    break;
                }
                Err(_) => break,
            }
        }
        self.state = WatchdogState::Expired;
        tracing::warn!(
            "[{}] {}s timeout is elapsed",
            Utc::now().timestamp(),
            self.timeout.as_secs_f64()
        );
        ConnectionError::WatchdogExpired(self.timeout)
    }

    /// Task-group entry point.
    pub async fn run(mut self, mut events: LivenessReceiver) -> Result<(), CycleError> {
        Err(self.watch(&mut events).await.into())
    }
}

/// Keep-alive probe timing.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    /// How long the server gets to echo a probe.
    pub timeout: Duration,
    /// Pause between an echo and the next probe.
    pub interval: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(10),
        }
    }
}

/// Writer half of the send channel, shared between the sender loop and the
/// probe. Held only for the duration of one frame write.
pub type SharedWriter<W> = Arc<Mutex<LineWriter<W>>>;

/// Send an empty line, expect a line back, repeat. A probe that is not
/// answered within `config.timeout` is a dead connection.
pub async fn ping_pong<R, W>(
    writer: SharedWriter<W>,
    mut reader: LineReader<R>,
    liveness: LivenessSender,
    config: KeepAlive,
) -> Result<(), CycleError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let probe = async {
            writer.lock().await.write_frame(codec::PROBE).await?;
            reader.read_line().await
        };
        match time::timeout(config.timeout, probe).await {
            Ok(Ok(echo)) => {
                tracing::trace!(%echo, "probe echoed");
                liveness.notify(LivenessKind::ProbeAcked);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = config.timeout.as_secs_f64(),
                    "keep-alive probe unanswered"
                );
                return Err(ConnectionError::ProbeTimeout(config.timeout).into());
            }
        }
        time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChannelKind;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test(start_paused = true)]
    async fn expires_after_timeout_of_silence() {
        let (_tx, mut rx) = liveness_channel();
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        let start = Instant::now();

        let err = watchdog.watch(&mut rx).await;

        assert!(matches!(err, ConnectionError::WatchdogExpired(d) if d == Duration::from_secs(5)));
        assert_eq!(watchdog.state(), WatchdogState::Expired);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn events_keep_it_waiting() {
        let (tx, mut rx) = liveness_channel();
        let feeder = tokio::spawn(async move {
            for _ in 0..5 {
                time::sleep(Duration::from_secs(4)).await;
                tx.notify(LivenessKind::MessageReceived);
            }
            // keep the sender alive but silent
            time::sleep(Duration::from_secs(3600)).await;
        });
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        let start = Instant::now();

        watchdog.watch(&mut rx).await;

        // Last event at 20s, expiry five seconds later.
        assert_eq!(start.elapsed().as_secs(), 25);
        feeder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_producers_still_wait_for_deadline() {
        let (tx, mut rx) = liveness_channel();
        drop(tx);
        let mut watchdog = Watchdog::new(Duration::from_secs(10));
        let start = Instant::now();

        watchdog.watch(&mut rx).await;

        assert_eq!(start.elapsed().as_secs(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_acked_when_echoed() {
        let (client, server) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client);
        let writer = Arc::new(Mutex::new(LineWriter::new(writer, ChannelKind::Send)));
        let reader = LineReader::new(reader, ChannelKind::Send);
        let (liveness, mut events) = liveness_channel();

        // Echo server: answer every line.
        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(server);
            let mut lines = BufReader::new(r).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                w.write_all(b"pong\n").await.unwrap();
            }
        });
        let probe = tokio::spawn(ping_pong(writer, reader, liveness, KeepAlive::default()));

        assert_eq!(events.recv().await.unwrap().kind, LivenessKind::ProbeAcked);
        assert_eq!(events.recv().await.unwrap().kind, LivenessKind::ProbeAcked);
        probe.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_fails_the_probe() {
        let (client, _server) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client);
        let writer = Arc::new(Mutex::new(LineWriter::new(writer, ChannelKind::Send)));
        let reader = LineReader::new(reader, ChannelKind::Send);
        let (liveness, _events) = liveness_channel();
        let start = Instant::now();

        let err = ping_pong(writer, reader, liveness, KeepAlive::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CycleError::Connection(ConnectionError::ProbeTimeout(_))));
        assert_eq!(start.elapsed().as_secs(), 5);
    }
}
