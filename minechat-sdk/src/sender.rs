//! Sender loop: outbound queue → send channel.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, mpsc};

use crate::codec;
use crate::error::CycleError;
use crate::watchdog::{LivenessKind, LivenessSender, SharedWriter};

/// Outbound queue shared across reconnect cycles. Each cycle's sender loop
/// holds the lock for as long as it runs.
pub type Outbox = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

pub fn outbox() -> (mpsc::UnboundedSender<String>, Outbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Arc::new(Mutex::new(rx)))
}

/// Write queued messages until the channel fails or every producer is gone.
/// Messages that are empty after sanitizing are skipped.
pub async fn run<W>(
    writer: SharedWriter<W>,
    outbox: Outbox,
    liveness: LivenessSender,
) -> Result<(), CycleError>
where
    W: AsyncWrite + Unpin,
{
    let mut queue = outbox.lock().await;
    while let Some(text) = queue.recv().await {
        let Some(frame) = codec::encode_message(&text) else {
            tracing::trace!("skipping empty outgoing message");
            continue;
        };
        writer.lock().await.write_frame(&frame).await?;
        tracing::debug!("Sent message: {frame:?}");
        liveness.notify(LivenessKind::MessageSent);
    }
    tracing::debug!("outbound queue closed");
    Err(CycleError::Shutdown)
}

/// Stand-in for [`run`] when the send channel is not logged in. Anything
/// written there would be read by the server as a login or registration
/// attempt, so queued messages are dropped instead.
pub async fn discard(outbox: Outbox) -> Result<(), CycleError> {
    let mut queue = outbox.lock().await;
    while let Some(text) = queue.recv().await {
        tracing::warn!(bytes = text.len(), "not logged in, message dropped");
    }
    tracing::debug!("outbound queue closed");
    Err(CycleError::Shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LineWriter;
    use crate::error::ConnectionError;
    use crate::event::ChannelKind;
    use crate::watchdog::liveness_channel;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn messages_are_framed_once_and_in_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let writer = Arc::new(Mutex::new(LineWriter::new(client, ChannelKind::Send)));
        let (tx, queue) = outbox();
        let (liveness, mut events) = liveness_channel();

        tx.send("hello".into()).unwrap();
        tx.send("".into()).unwrap();
        tx.send("multi\nline".into()).unwrap();
        tx.send("\n".into()).unwrap();
        drop(tx);

        let result = run(writer.clone(), queue, liveness).await;
        assert!(matches!(result, Err(CycleError::Shutdown)));
        writer.lock().await.close().await;
        drop(writer);

        let mut wire = String::new();
        server.read_to_string(&mut wire).await.unwrap();
        assert_eq!(wire, "hello\n\nmultiline\n\n");

        assert_eq!(events.recv().await.unwrap().kind, LivenessKind::MessageSent);
        assert_eq!(events.recv().await.unwrap().kind, LivenessKind::MessageSent);
        assert!(events.try_recv().is_err(), "empty messages are not sends");
    }

    #[tokio::test]
    async fn write_failure_is_a_connection_error() {
        let (client, server) = tokio::io::duplex(16);
        drop(server);
        let writer = Arc::new(Mutex::new(LineWriter::new(client, ChannelKind::Send)));
        let (tx, queue) = outbox();
        let (liveness, _events) = liveness_channel();

        tx.send("anyone there?".into()).unwrap();

        let result = run(writer, queue, liveness).await;
        assert!(matches!(
            result,
            Err(CycleError::Connection(ConnectionError::Io {
                channel: ChannelKind::Send,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn queue_survives_a_cycle() {
        let (tx, queue) = outbox();
        let (liveness, _events) = liveness_channel();

        // First cycle dies on a broken pipe with the message in flight.
        let (dead, server) = tokio::io::duplex(16);
        drop(server);
        let writer = Arc::new(Mutex::new(LineWriter::new(dead, ChannelKind::Send)));
        tx.send("lost".into()).unwrap();
        assert!(run(writer, queue.clone(), liveness.clone()).await.is_err());

        // The next cycle picks up what was queued meanwhile.
        let (client, mut server) = tokio::io::duplex(1024);
        let writer = Arc::new(Mutex::new(LineWriter::new(client, ChannelKind::Send)));
        tx.send("after reconnect".into()).unwrap();
        drop(tx);
        assert!(matches!(
            run(writer.clone(), queue, liveness).await,
            Err(CycleError::Shutdown)
        ));
        writer.lock().await.close().await;
        drop(writer);

        let mut wire = String::new();
        server.read_to_string(&mut wire).await.unwrap();
        assert_eq!(wire, "after reconnect\n\n");
    }

    #[tokio::test]
    async fn discard_drains_without_writing() {
        let (tx, queue) = outbox();
        tx.send("nobody hears this".into()).unwrap();
        tx.send("or this".into()).unwrap();
        drop(tx);

        assert!(matches!(discard(queue.clone()).await, Err(CycleError::Shutdown)));
        assert!(queue.lock().await.try_recv().is_err());
    }
}
