//! Socket transport: framing, batched reads and graceful close.
//!
//! [`Framer`] owns the connected stream (plain or TLS), a carry-over read
//! buffer and the line decoder. One `read_batch` call maps to at most one
//! socket read; however many complete lines that read finishes are returned
//! together and partial trailing bytes wait in the buffer for the next call.

mod line;
pub(crate) mod tls;

use std::io;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::error::DisconnectReason;
use line::LineDecoder;

/// One socket read's worth of bytes.
const READ_CHUNK: usize = 4096;

/// The connected stream, before or after TLS upgrade.
pub(crate) enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn read_chunk(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read_buf(buf).await,
            Self::Tls(s) => s.read_buf(buf).await,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.write_all(bytes).await,
            Self::Tls(s) => s.write_all(bytes).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush().await,
            Self::Tls(s) => s.flush().await,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
        }
    }
}

/// Result of one [`Framer::read_batch`] cycle.
pub(crate) enum ReadBatch {
    /// The read completed; zero or more lines became whole.
    Lines(Vec<String>),
    /// Nothing arrived within the wait budget.
    Idle,
    /// The session is over; the socket should be dropped.
    Closed(DisconnectReason),
}

pub(crate) struct Framer {
    stream: Stream,
    buf: BytesMut,
    decoder: LineDecoder,
    last_send: Instant,
    last_recv: Instant,
}

impl Framer {
    pub(crate) fn new(stream: Stream, max_line_len: usize) -> Self {
        let now = Instant::now();
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: LineDecoder::new(max_line_len),
            last_send: now,
            last_recv: now,
        }
    }

    /// Perform one bounded read and drain every line it completed.
    pub(crate) async fn read_batch(&mut self, wait: Duration) -> ReadBatch {
        let read = tokio::time::timeout(wait, self.stream.read_chunk(&mut self.buf)).await;
        match read {
            Err(_) => ReadBatch::Idle,
            Ok(Ok(0)) => ReadBatch::Closed(DisconnectReason::PeerClosed),
            Ok(Ok(_)) => {
                self.last_recv = Instant::now();
                let mut lines = Vec::new();
                loop {
                    match self.decoder.decode(&mut self.buf) {
                        Ok(Some(line)) => lines.push(line),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "dropping connection on oversized line");
                            return ReadBatch::Closed(DisconnectReason::OversizedLine);
                        }
                    }
                }
                ReadBatch::Lines(lines)
            }
            Ok(Err(e)) => ReadBatch::Closed(DisconnectReason::ReadFailed(e.to_string())),
        }
    }

    /// Write one line plus terminator, fully.
    pub(crate) async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        self.last_send = Instant::now();
        Ok(())
    }

    /// Shut down the write half, then drain and discard inbound bytes until
    /// EOF, an error, `max_reads` reads or the time budget runs out.
    pub(crate) async fn graceful_close(mut self, budget: Duration, max_reads: u32) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "shutdown during graceful close");
            return;
        }
        let deadline = Instant::now() + budget;
        let mut scratch = BytesMut::with_capacity(READ_CHUNK);
        for _ in 0..max_reads {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match tokio::time::timeout(left, self.stream.read_chunk(&mut scratch)).await {
                Ok(Ok(n)) if n > 0 => scratch.clear(),
                _ => break,
            }
        }
    }

    /// Give up the underlying stream for a TLS takeover.
    ///
    /// Bytes already buffered but not yet decoded would predate the upgrade
    /// acknowledgement; a well-behaved server sends nothing there, so they
    /// are logged and discarded.
    pub(crate) fn into_stream(self) -> Stream {
        if !self.buf.is_empty() {
            warn!(
                bytes = self.buf.len(),
                "discarding undecoded bytes at tls takeover"
            );
        }
        self.stream
    }

    /// When the last line was written.
    pub(crate) fn last_send(&self) -> Instant {
        self.last_send
    }

    /// When the last read returned data.
    pub(crate) fn last_recv(&self) -> Instant {
        self.last_recv
    }
}
