//! Framed duplex transport over TCP.
//!
//! [`Transport`] is a thin wrapper around `tokio::net::TcpStream` that
//! speaks [`crate::wire::Frame`] instead of raw bytes.  All protocol logic
//! lives elsewhere; this module owns only byte I/O and the framing
//! boundary:
//!
//! - [`FrameReader`] pulls bytes off the read half, accumulates them in a
//!   [`FrameBuffer`], and yields decoded frames.  Reading blocks only the
//!   task that polls it.  Malformed records are logged and skipped by
//!   [`FrameReader::next_frame`]; never fatal.
//! - [`FrameWriter`] hands frames to a background writer task through a
//!   channel, so any task (reader loop, retransmission timers, the driver)
//!   can emit a frame without blocking.  A send is best-effort: if the
//!   writer task is gone the failure is reported to the caller, not
//!   retried; retries belong to the window manager's timeout logic.
//!
//! Dropping every [`FrameWriter`] clone closes the channel, which ends the
//! writer task and releases the write half of the stream.

use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::connection::ConnectionError;
use crate::wire::{self, Frame, FrameBuffer, WireError};

/// Read granularity for the transport; records are far smaller.
const READ_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Accepts inbound connections and wraps them as [`Transport`]s.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `addr`; `127.0.0.1:0` picks an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ConnectionError> {
        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> Result<Transport, ConnectionError> {
        let (stream, peer) = self.inner.accept().await?;
        log::info!("accepted connection from {peer}");
        Ok(Transport { stream, peer })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One established duplex byte stream, not yet split into halves.
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Transport {
    /// Active open towards `peer`.
    pub async fn connect(peer: SocketAddr) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(peer).await?;
        log::info!("connected to {peer}");
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split into the reader half and the channel-backed writer handle.
    ///
    /// The spawned writer task serialises frames in submission order and
    /// exits when the last [`FrameWriter`] clone is dropped or the stream
    /// rejects a write.
    pub fn split(self) -> (FrameReader, FrameWriter) {
        let (read_half, write_half) = self.stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_half, rx));
        (
            FrameReader { read: read_half, buffer: FrameBuffer::new() },
            FrameWriter { tx },
        )
    }
}

async fn write_loop(mut write: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let line = match wire::encode(&frame) {
            Ok(line) => line,
            Err(e) => {
                // Unencodable frames are a caller bug; drop rather than
                // poison the stream.
                log::error!("refusing to encode {frame:?}: {e}");
                continue;
            }
        };
        if let Err(e) = write.write_all(line.as_bytes()).await {
            log::warn!("transport write failed, writer stopping: {e}");
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// FrameWriter
// ---------------------------------------------------------------------------

/// Cloneable handle for emitting frames from any task.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::UnboundedSender<Frame>,
}

impl FrameWriter {
    /// Queue `frame` for transmission.  Non-blocking; fails only when the
    /// writer task has stopped (stream closed).
    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.tx.send(frame).map_err(|_| ConnectionError::Closed)
    }
}

// ---------------------------------------------------------------------------
// FrameReader
// ---------------------------------------------------------------------------

/// Decoding reader over the receive half of the stream.
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
    buffer: FrameBuffer,
}

impl FrameReader {
    /// Next well-formed frame, or `None` at end of stream.
    ///
    /// Malformed records are logged and dropped; the stream keeps going.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            match self.next_result().await? {
                Some(Ok(frame)) => return Ok(Some(frame)),
                Some(Err(e)) => {
                    log::warn!("dropping malformed record: {e}");
                    continue;
                }
                None => return Ok(None),
            }
        }
    }

    /// Like [`next_frame`](Self::next_frame) but malformed records are an
    /// error.  Used during the handshake, where a garbled greeting must
    /// reject the connection instead of being skipped.
    pub async fn next_frame_strict(&mut self) -> Result<Option<Frame>, ConnectionError> {
        match self.next_result().await? {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(ConnectionError::Wire(e)),
            None => Ok(None),
        }
    }

    /// One record's decode outcome, reading more bytes as needed.
    async fn next_result(
        &mut self,
    ) -> Result<Option<Result<Frame, WireError>>, ConnectionError> {
        loop {
            if let Some(record) = self.buffer.next_record() {
                return Ok(Some(wire::decode(&record)));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.read.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buffer.push(&chunk[..n]);
        }
    }
}
