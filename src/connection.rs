//! Per-connection drivers for both endpoints.
//!
//! # Architecture
//!
//! ```text
//!  messages                                  delivered payloads
//!     │                                             ▲
//!     ▼                                             │
//!  SenderConnection::transfer          ReceiverConnection::serve
//!    ├── driver loop (stall guard)        └── read → RecvWindow → replies
//!    ├── reader task (ACK/NAK/dup)
//!    ├── TimerTable (one task per in-flight sequence)
//!    └── Arc<Mutex<SendWindow>>  ◀── the single serialization point
//!                 │
//!            FrameWriter (channel to the writer task)
//!                 │
//!            TCP byte stream
//! ```
//!
//! All mutation of sender state happens under one mutex per connection:
//! the reader task, the driver, and every retransmission timer take the
//! same lock, consult the [`SendWindow`], and act on its verdict.  A timer
//! firing concurrently with its own cancellation re-checks the record
//! status under that lock, so a post-acknowledgment firing is a no-op.
//! Teardown cancels the whole [`TimerTable`] before the transfer result is
//! returned; no timer outlives its connection.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::config::{ProtocolConfig, SenderConfig};
use crate::congestion::CongestionState;
use crate::fault::FaultPlan;
use crate::handshake::{self, HandshakeAgreement};
use crate::packet::Packet;
use crate::recv_window::{RecvAction, RecvWindow};
use crate::send_window::{NakAction, SendWindow, TimerVerdict};
use crate::timers::TimerTable;
use crate::transport::{FrameReader, FrameWriter, Listener, Transport};
use crate::wire::{self, Frame, WireError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Connection-level failures; these surface to the caller as the terminal
/// result of a connection or transfer.  Per-packet conditions (integrity,
/// ordering) never appear here; the window managers absorb them.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("peer rejected the handshake")]
    HandshakeRejected,
    #[error("handshake offer `{offered}` does not match configured `{configured}`")]
    HandshakeMismatch { offered: String, configured: String },
    #[error("sequence {0} exhausted its retransmission budget")]
    RetryExhausted(u64),
    #[error("no acknowledgment progress after {0} consecutive poll cycles")]
    LivenessTimeout(u32),
    #[error("transport closed while frames were outstanding")]
    Closed,
}

/// Lock that shrugs off poisoning: window state stays usable even if some
/// task panicked while holding the guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Shared emitter for data frames: consults the fault plan once per
/// transmission, so a planned corruption hits exactly one copy.
#[derive(Clone)]
struct Outbound {
    writer: FrameWriter,
    faults: Arc<Mutex<FaultPlan>>,
}

impl Outbound {
    fn send_data(&self, packet: &Packet) {
        let frame = if lock(&self.faults).take(packet.sequence) {
            log::info!("[send] seq={} transmitted corrupted", packet.sequence);
            packet.corrupted_frame()
        } else {
            packet.frame()
        };
        if let Err(e) = self.writer.send(frame) {
            log::warn!("[send] seq={} write failed: {e}", packet.sequence);
        }
    }

    fn send_abort(&self, sequence: u64) {
        if let Err(e) = self.writer.send(Frame::Abort { sequence, failed: true }) {
            log::warn!("[send] abort of seq={sequence} write failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// SenderConnection
// ---------------------------------------------------------------------------

/// Outcome of a completed transfer.
#[derive(Debug)]
pub struct TransferReport {
    /// Every sequence number the peer acknowledged.
    pub acknowledged: BTreeSet<u64>,
}

/// The initiating endpoint: connects, negotiates, then drives a batch of
/// messages to the acknowledged state.
#[derive(Debug)]
pub struct SenderConnection {
    reader: FrameReader,
    writer: FrameWriter,
    config: SenderConfig,
    faults: FaultPlan,
    agreement: HandshakeAgreement,
}

impl SenderConnection {
    /// Active open: connect to `peer` and negotiate the configured terms.
    pub async fn connect(
        peer: SocketAddr,
        config: SenderConfig,
        faults: FaultPlan,
    ) -> Result<Self, ConnectionError> {
        let transport = Transport::connect(peer).await?;
        let (mut reader, writer) = transport.split();
        let agreement =
            handshake::initiate(&mut reader, &writer, config.protocol.agreement()).await?;
        Ok(Self { reader, writer, config, faults, agreement })
    }

    pub fn agreement(&self) -> HandshakeAgreement {
        self.agreement
    }

    /// Deliver `messages` reliably, in order, numbered from 1.
    ///
    /// Returns once every message is acknowledged, or fails with
    /// [`ConnectionError::RetryExhausted`] when one sequence runs out of
    /// retransmissions (the batch halts; acknowledged packets stay valid)
    /// or [`ConnectionError::LivenessTimeout`] when no acknowledgment
    /// arrives for the configured number of poll cycles.
    pub async fn transfer(self, messages: Vec<String>) -> Result<TransferReport, ConnectionError> {
        for payload in &messages {
            wire::validate_payload(payload)?;
        }

        let width = self.config.protocol.checksum_width;
        let congestion = self
            .config
            .congestion
            .as_ref()
            .map(|c| CongestionState::new(c.initial_ssthresh));
        let window = Arc::new(Mutex::new(SendWindow::new(
            self.agreement.window_size,
            self.config.max_retries,
            congestion,
        )));
        let timers = Arc::new(Mutex::new(TimerTable::new()));
        let outbound = Outbound {
            writer: self.writer.clone(),
            faults: Arc::new(Mutex::new(self.faults)),
        };

        // Admit the whole batch; the window decides what goes out now.
        let mut first_flight = Vec::new();
        {
            let mut w = lock(&window);
            for (index, payload) in messages.into_iter().enumerate() {
                let packet = Packet::new(index as u64 + 1, payload, width);
                if w.submit(packet.clone()) {
                    first_flight.push(packet);
                }
            }
        }
        for packet in first_flight {
            log::debug!("[send] seq={} first transmission", packet.sequence);
            outbound.send_data(&packet);
            arm_retransmit_timer(
                packet.sequence,
                &window,
                &timers,
                &outbound,
                &self.config,
            );
        }

        let reader_task = tokio::spawn(reader_loop(
            self.reader,
            Arc::clone(&window),
            Arc::clone(&timers),
            outbound.clone(),
            self.config.clone(),
        ));

        // Driver: poll for completion and guard liveness.  A cycle without
        // a single new acknowledgment counts toward the stall budget.
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut last_acked = 0usize;
        let mut stalled = 0u32;
        let result = loop {
            ticker.tick().await;
            let (failed, complete, acked) = {
                let w = lock(&window);
                (w.failed(), w.all_acknowledged(), w.acked_count())
            };
            if let Some(sequence) = failed {
                break Err(ConnectionError::RetryExhausted(sequence));
            }
            if complete {
                break Ok(TransferReport { acknowledged: lock(&window).acknowledged_set() });
            }
            if acked > last_acked {
                last_acked = acked;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled > self.config.stall_limit {
                    log::error!("[send] no progress in {stalled} cycles, aborting connection");
                    break Err(ConnectionError::LivenessTimeout(stalled));
                }
            }
        };

        // Teardown: no timer may fire past this point, and dropping the
        // writer handles releases the transport.
        reader_task.abort();
        lock(&timers).cancel_all();
        result
    }
}

/// Spawn the retransmission task for one in-flight sequence.
///
/// The task sleeps the fixed timeout, then asks the window what the firing
/// means *under the lock*: retransmit and re-arm, lapse silently (the
/// record went terminal first), or abort the record and emit `ABORT`.
fn arm_retransmit_timer(
    sequence: u64,
    window: &Arc<Mutex<SendWindow>>,
    timers: &Arc<Mutex<TimerTable>>,
    outbound: &Outbound,
    config: &SenderConfig,
) {
    let window = Arc::clone(window);
    let outbound = outbound.clone();
    let timeout = config.retransmit_timeout;
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(timeout).await;
            let verdict = lock(&window).on_timer_expiry(sequence);
            match verdict {
                TimerVerdict::Lapsed => break,
                TimerVerdict::Retransmit(packet) => {
                    log::debug!("[send] seq={sequence} timed out, retransmitting");
                    outbound.send_data(&packet);
                }
                TimerVerdict::Exhausted => {
                    log::warn!("[send] seq={sequence} out of retries, aborting packet");
                    outbound.send_abort(sequence);
                    break;
                }
            }
        }
    });
    lock(timers).arm(sequence, handle);
}

/// Inbound half of the sender: applies peer responses to the window and
/// performs whatever follow-up transmissions they unlock.
async fn reader_loop(
    mut reader: FrameReader,
    window: Arc<Mutex<SendWindow>>,
    timers: Arc<Mutex<TimerTable>>,
    outbound: Outbound,
    config: SenderConfig,
) {
    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::debug!("[send] peer closed the response stream");
                break;
            }
            Err(e) => {
                log::warn!("[send] response stream failed: {e}");
                break;
            }
        };
        match frame {
            Frame::Ack { sequence, .. } | Frame::AckDuplicate { sequence } => {
                let acked = lock(&window).on_ack(sequence);
                if acked.newly_acked {
                    log::debug!("[send] seq={sequence} acknowledged");
                    lock(&timers).cancel(sequence);
                }
                for packet in acked.released {
                    log::debug!("[send] seq={} released by window advance", packet.sequence);
                    outbound.send_data(&packet);
                    arm_retransmit_timer(packet.sequence, &window, &timers, &outbound, &config);
                }
            }
            Frame::Nak { sequence, .. } => {
                let action = lock(&window).on_nak(sequence);
                match action {
                    NakAction::Retransmit { packet, newly_in_flight } => {
                        log::debug!("[send] seq={sequence} NAK'd, retransmitting now");
                        outbound.send_data(&packet);
                        if newly_in_flight {
                            arm_retransmit_timer(
                                packet.sequence,
                                &window,
                                &timers,
                                &outbound,
                                &config,
                            );
                        }
                    }
                    NakAction::Ignore => {
                        log::debug!("[send] NAK for settled seq={sequence}, ignoring");
                    }
                }
            }
            other => log::debug!("[send] ignoring unexpected frame: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverConnection
// ---------------------------------------------------------------------------

/// Outcome of serving one inbound connection to completion.
#[derive(Debug)]
pub struct ReceiverReport {
    /// Payloads handed to the application, in delivery order.
    pub delivered: Vec<(u64, String)>,
}

/// The accepting endpoint: validates, orders, and delivers inbound packets
/// until the peer closes the stream.
pub struct ReceiverConnection {
    reader: FrameReader,
    writer: FrameWriter,
    window: RecvWindow,
}

impl ReceiverConnection {
    /// Passive open: take the next connection off `listener` and negotiate.
    ///
    /// A mismatched or malformed greeting returns the error and drops the
    /// transport, which is how the responder refuses a connection.
    pub async fn accept(
        listener: &Listener,
        config: &ProtocolConfig,
    ) -> Result<Self, ConnectionError> {
        let transport = listener.accept().await?;
        let (mut reader, writer) = transport.split();
        handshake::respond(&mut reader, &writer, config.agreement()).await?;
        Ok(Self { reader, writer, window: RecvWindow::new(config) })
    }

    /// Run the receive loop until end of stream.
    ///
    /// Data and simulated-corruption records go through the receive window
    /// identically (the corrupted ones simply fail verification); aborts
    /// retire their sequence numbers.  Replies ride back on the same
    /// connection.
    pub async fn serve(mut self) -> Result<ReceiverReport, ConnectionError> {
        let mut delivered = Vec::new();
        while let Some(frame) = self.reader.next_frame().await? {
            let actions = match frame {
                Frame::Data { sequence, payload, checksum }
                | Frame::Corrupt { sequence, payload, checksum } => {
                    self.window.on_packet(sequence, &payload, checksum)
                }
                Frame::Abort { sequence, failed } => {
                    log::warn!(
                        "[recv] sender abandoned seq={sequence}{}",
                        if failed { " (batch failed)" } else { "" }
                    );
                    self.window.on_abort(sequence)
                }
                other => {
                    log::debug!("[recv] ignoring unexpected frame: {other}");
                    Vec::new()
                }
            };
            for action in actions {
                match action {
                    RecvAction::Deliver { sequence, payload } => {
                        log::info!("[recv] delivered seq={sequence}: {payload}");
                        delivered.push((sequence, payload));
                    }
                    RecvAction::Reply(reply) => self.writer.send(reply)?,
                }
            }
        }
        log::info!("[recv] peer closed, {} payload(s) delivered", delivered.len());
        Ok(ReceiverReport { delivered })
    }
}
