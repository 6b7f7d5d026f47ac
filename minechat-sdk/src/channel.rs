//! Line-oriented halves of a server connection.

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};

use crate::codec;
use crate::error::ConnectionError;
use crate::event::ChannelKind;

/// Reading half. Yields one decoded line per call.
pub struct LineReader<R> {
    inner: BufReader<R>,
    channel: ChannelKind,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, channel: ChannelKind) -> Self {
        Self {
            inner: BufReader::new(inner),
            channel,
            buf: Vec::new(),
        }
    }

    /// Read the next line. End of stream is [`ConnectionError::Closed`].
    ///
    /// Cancel safe: a partially read line stays buffered for the next call.
    pub async fn read_line(&mut self) -> Result<String, ConnectionError> {
        let n = self
            .inner
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|e| ConnectionError::io(self.channel, e))?;
        if n == 0 && self.buf.is_empty() {
            return Err(ConnectionError::Closed {
                channel: self.channel,
            });
        }
        let line = codec::decode(&self.buf);
        self.buf.clear();
        tracing::trace!(channel = %self.channel, "<< {line}");
        Ok(line)
    }
}

/// Writing half. Every frame is flushed before the call returns.
pub struct LineWriter<W> {
    inner: W,
    channel: ChannelKind,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W, channel: ChannelKind) -> Self {
        Self { inner, channel }
    }

    /// Write an already framed payload (see [`codec`]).
    pub async fn write_frame(&mut self, frame: &str) -> Result<(), ConnectionError> {
        self.inner
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| ConnectionError::io(self.channel, e))?;
        self.inner
            .flush()
            .await
            .map_err(|e| ConnectionError::io(self.channel, e))?;
        tracing::trace!(channel = %self.channel, "Sent frame: {frame:?}");
        Ok(())
    }

    /// Shut the write direction down. Errors are logged, not returned: the
    /// connection is being thrown away either way.
    pub async fn close(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(channel = %self.channel, error = %e, "shutdown failed");
        }
    }
}

/// One server connection split into its line reader and line writer.
pub struct Channel<S> {
    pub reader: LineReader<ReadHalf<S>>,
    pub writer: LineWriter<WriteHalf<S>>,
    kind: ChannelKind,
}

impl<S: AsyncRead + AsyncWrite> Channel<S> {
    pub fn new(stream: S, kind: ChannelKind) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: LineReader::new(reader, kind),
            writer: LineWriter::new(writer, kind),
            kind,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub async fn read_line(&mut self) -> Result<String, ConnectionError> {
        self.reader.read_line().await
    }

    pub async fn write_frame(&mut self, frame: &str) -> Result<(), ConnectionError> {
        self.writer.write_frame(frame).await
    }

    /// Close the connection. The socket is released once both halves drop,
    /// which happens here.
    pub async fn close(mut self) {
        self.writer.close().await;
        tracing::debug!(channel = %self.kind, "channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn reads_lines_in_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut channel = Channel::new(client, ChannelKind::Read);
        server.write_all(b"one\ntwo\r\nthree\n").await.unwrap();

        assert_eq!(channel.read_line().await.unwrap(), "one");
        assert_eq!(channel.read_line().await.unwrap(), "two");
        assert_eq!(channel.read_line().await.unwrap(), "three");
    }

    #[tokio::test]
    async fn eof_is_closed_error() {
        let (client, server) = tokio::io::duplex(1024);
        let mut channel = Channel::new(client, ChannelKind::Read);
        drop(server);

        let err = channel.read_line().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Closed {
                channel: ChannelKind::Read
            }
        ));
    }

    #[tokio::test]
    async fn trailing_partial_line_is_delivered_before_close() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut channel = Channel::new(client, ChannelKind::Read);
        server.write_all(b"no terminator").await.unwrap();
        drop(server);

        assert_eq!(channel.read_line().await.unwrap(), "no terminator");
        assert!(channel.read_line().await.is_err());
    }

    #[tokio::test]
    async fn write_frame_reaches_peer() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut channel = Channel::new(client, ChannelKind::Send);
        channel.write_frame("hello\n\n").await.unwrap();
        channel.close().await;

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "hello\n\n");
    }

    #[tokio::test]
    async fn cancelled_read_keeps_partial_line() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut channel = Channel::new(client, ChannelKind::Send);
        server.write_all(b"hal").await.unwrap();

        let first = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            channel.read_line(),
        )
        .await;
        assert!(first.is_err(), "line is incomplete, read must still be pending");

        server.write_all(b"f\n").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), "half");
    }
}
