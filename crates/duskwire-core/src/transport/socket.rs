//! Exact-length buffered socket wrapper.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Hard cap on buffered input. Exceeding it is a fatal protocol error.
pub const MAX_IN_BUFFER: usize = 256 * 1024;

/// Any reliable byte stream the protocol can run over.
///
/// Tor-accepted and SOCKS-dialed sockets are `TcpStream`s; tests drive
/// sessions over `tokio::io::duplex` pipes.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// A connected byte-stream socket with exact-length reads and queued writes.
///
/// `want_bytes(n)` resolves once exactly `n` bytes are available; surplus
/// input stays buffered for the next call. `queue_write` never blocks the
/// caller; `flush` drains the output queue and reports when it empties,
/// which is the signal bulk senders throttle on.
pub struct ConnectionSocket {
    uuid: Uuid,
    stream: Box<dyn IoStream>,
    in_buf: BytesMut,
    out_buf: BytesMut,
}

impl ConnectionSocket {
    /// Wrap a connected stream.
    pub fn new(stream: impl IoStream + 'static) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            stream: Box::new(stream),
            in_buf: BytesMut::with_capacity(8 * 1024),
            out_buf: BytesMut::new(),
        }
    }

    /// Connection identifier, stable for the socket's lifetime.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Append bytes to the output queue. Never blocks.
    pub fn queue_write(&mut self, data: &[u8]) {
        self.out_buf.extend_from_slice(data);
    }

    /// Drain the output queue to the socket.
    ///
    /// Returns `true` if the queue transitioned from non-empty to empty,
    /// the cue for senders that throttle on drain.
    pub async fn flush(&mut self) -> Result<bool> {
        if self.out_buf.is_empty() {
            return Ok(false);
        }

        self.stream
            .write_all_buf(&mut self.out_buf)
            .await
            .map_err(|e| Error::Transport(format!("write failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush failed: {}", e)))?;

        Ok(true)
    }

    /// Read exactly `n` bytes, buffering any surplus for the next call.
    ///
    /// Cancel-safe: partially read input is retained in the buffer.
    pub async fn want_bytes(&mut self, n: usize) -> Result<Bytes> {
        if n > MAX_IN_BUFFER {
            return Err(Error::Transport(format!(
                "requested {} bytes exceeds input buffer cap",
                n
            )));
        }

        while self.in_buf.len() < n {
            let read = self
                .stream
                .read_buf(&mut self.in_buf)
                .await
                .map_err(|e| Error::Transport(format!("read failed: {}", e)))?;

            if read == 0 {
                return Err(Error::Transport("connection closed by peer".into()));
            }

            if self.in_buf.len() > MAX_IN_BUFFER {
                return Err(Error::Transport("input buffer overflow".into()));
            }
        }

        Ok(self.in_buf.split_to(n).freeze())
    }

    /// Bytes currently buffered on the input side.
    pub fn buffered(&self) -> usize {
        self.in_buf.len()
    }

    /// Bytes queued but not yet flushed on the output side.
    pub fn pending_out(&self) -> usize {
        self.out_buf.len()
    }

    /// Shut down the write half. Queued but unflushed output is dropped.
    pub async fn shutdown(&mut self) {
        self.out_buf.clear();
        let _ = self.stream.shutdown().await;
    }
}

impl std::fmt::Debug for ConnectionSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSocket")
            .field("uuid", &self.uuid)
            .field("buffered", &self.in_buf.len())
            .field("pending_out", &self.out_buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_reads_with_surplus() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = ConnectionSocket::new(a);
        let mut reader = ConnectionSocket::new(b);

        writer.queue_write(b"hello world");
        assert_eq!(writer.pending_out(), 11);
        assert!(writer.flush().await.expect("flush"));
        assert_eq!(writer.pending_out(), 0);

        let first = reader.want_bytes(5).await.expect("want 5");
        assert_eq!(&first[..], b"hello");
        // Surplus stays buffered for the next pull.
        assert_eq!(reader.buffered(), 6);

        let rest = reader.want_bytes(6).await.expect("want 6");
        assert_eq!(&rest[..], b" world");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn wants_spanning_multiple_writes() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = ConnectionSocket::new(a);
        let mut reader = ConnectionSocket::new(b);

        let read_task = tokio::spawn(async move {
            reader.want_bytes(8).await.expect("want 8")
        });

        writer.queue_write(b"abcd");
        writer.flush().await.expect("flush 1");
        tokio::task::yield_now().await;
        writer.queue_write(b"efgh");
        writer.flush().await.expect("flush 2");

        let got = read_task.await.expect("join");
        assert_eq!(&got[..], b"abcdefgh");
    }

    #[tokio::test]
    async fn oversized_want_is_fatal() {
        let (a, _b) = tokio::io::duplex(64);
        let mut socket = ConnectionSocket::new(a);

        let err = socket.want_bytes(MAX_IN_BUFFER + 1).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn closed_peer_reports_transport_error() {
        let (a, b) = tokio::io::duplex(64);
        let mut reader = ConnectionSocket::new(a);
        drop(b);

        let err = reader.want_bytes(1).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn flush_on_empty_queue_is_not_a_drain() {
        let (a, _b) = tokio::io::duplex(64);
        let mut socket = ConnectionSocket::new(a);
        assert!(!socket.flush().await.expect("flush"));
    }
}
