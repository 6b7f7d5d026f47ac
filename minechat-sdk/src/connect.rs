//! Opening server connections.
//!
//! Refused and reset connections are retried immediately a few times, then
//! every `backoff` for as long as it takes. There is no attempt cap and no
//! backoff growth: the opener only returns once it has a connection, and the
//! supervisor stops it by dropping the future.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::channel::Channel;
use crate::event::ChannelKind;

/// Retry behaviour for [`open`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Immediate retries after a refused/reset connection before backing off.
    pub immediate_retries: u32,
    /// Fixed delay between attempts once the immediate retries are used up.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            immediate_retries: 1,
            backoff: Duration::from_secs(3),
        }
    }
}

/// Something that can produce a byte stream to `host:port`.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}

fn is_refusal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// Open a channel, retrying until it succeeds.
pub async fn open<C: Connector>(
    connector: &C,
    host: &str,
    port: u16,
    policy: &RetryPolicy,
    kind: ChannelKind,
) -> Channel<C::Stream> {
    let mut retries_used: u32 = 0;
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        tracing::debug!(channel = %kind, %host, port, attempt, "connecting");
        match connector.connect(host, port).await {
            Ok(stream) => {
                tracing::info!(channel = %kind, %host, port, attempt, "connection established");
                return Channel::new(stream, kind);
            }
            Err(e) if is_refusal(&e) && retries_used < policy.immediate_retries => {
                retries_used += 1;
                tracing::warn!(channel = %kind, attempt, error = %e, "no connection, retrying now");
            }
            Err(e) => {
                tracing::warn!(
                    channel = %kind,
                    attempt,
                    error = %e,
                    delay_secs = policy.backoff.as_secs_f64(),
                    "no connection, retrying after backoff"
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::DuplexStream;
    use tokio::time::Instant;

    /// Fails with the given error kinds in order, then succeeds.
    struct Scripted {
        failures: Mutex<Vec<io::ErrorKind>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl Scripted {
        fn new(failures: Vec<io::ErrorKind>) -> Self {
            let mut failures = failures;
            failures.reverse();
            Self {
                failures: Mutex::new(failures),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Connector for Scripted {
        type Stream = DuplexStream;

        async fn connect(&self, _host: &str, _port: u16) -> io::Result<DuplexStream> {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self.failures.lock().unwrap().pop();
            match next {
                Some(kind) => Err(io::Error::from(kind)),
                None => {
                    let (client, _server) = tokio::io::duplex(64);
                    Ok(client)
                }
            }
        }
    }

    fn offsets(attempts: &[Instant]) -> Vec<u64> {
        let start = attempts[0];
        attempts
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_time() {
        let connector = Scripted::new(vec![]);
        let policy = RetryPolicy::default();
        let channel = open(&connector, "chat", 5000, &policy, ChannelKind::Read).await;
        assert_eq!(channel.kind(), ChannelKind::Read);
        assert_eq!(connector.attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_retries_then_fixed_backoff() {
        use io::ErrorKind::ConnectionRefused;
        // Three immediate failures with a limit of two retries, then one more
        // failure inside the backoff regime, then success.
        let connector = Scripted::new(vec![ConnectionRefused; 4]);
        let policy = RetryPolicy {
            immediate_retries: 2,
            backoff: Duration::from_secs(3),
        };

        open(&connector, "chat", 5050, &policy, ChannelKind::Send).await;

        let attempts = connector.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 5);
        assert_eq!(offsets(&attempts), vec![0, 0, 0, 3, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_counts_as_refusal() {
        let connector = Scripted::new(vec![io::ErrorKind::ConnectionReset]);
        let policy = RetryPolicy {
            immediate_retries: 1,
            backoff: Duration::from_secs(3),
        };

        open(&connector, "chat", 5000, &policy, ChannelKind::Read).await;

        let attempts = connector.attempts.lock().unwrap();
        assert_eq!(offsets(&attempts), vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_skip_immediate_retry() {
        let connector = Scripted::new(vec![io::ErrorKind::NotFound, io::ErrorKind::NotFound]);
        let policy = RetryPolicy {
            immediate_retries: 5,
            backoff: Duration::from_secs(3),
        };

        open(&connector, "chat", 5000, &policy, ChannelKind::Read).await;

        let attempts = connector.attempts.lock().unwrap();
        assert_eq!(offsets(&attempts), vec![0, 3, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_gives_up() {
        let connector = Scripted::new(vec![io::ErrorKind::ConnectionRefused; 100]);
        let policy = RetryPolicy {
            immediate_retries: 0,
            backoff: Duration::from_secs(1),
        };

        open(&connector, "chat", 5000, &policy, ChannelKind::Read).await;

        assert_eq!(connector.attempts.lock().unwrap().len(), 101);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_future_stops_retrying() {
        let connector = Scripted::new(vec![io::ErrorKind::ConnectionRefused; 100]);
        let policy = RetryPolicy {
            immediate_retries: 0,
            backoff: Duration::from_secs(1),
        };

        let result = tokio::time::timeout(
            Duration::from_millis(2500),
            open(&connector, "chat", 5000, &policy, ChannelKind::Read),
        )
        .await;
        assert!(result.is_err());

        let seen = connector.attempts.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts.lock().unwrap().len(), seen);
        assert_eq!(seen, 3);
    }
}
