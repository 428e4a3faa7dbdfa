//! `sliding-window` — reliable, ordered message delivery over a
//! corruptible byte stream.
//!
//! A sliding-window ARQ protocol: the sender keeps up to N packets in
//! flight, the receiver checksums and orders them, and NAKs plus
//! per-sequence retransmission timers repair whatever the (simulated)
//! channel damages.  Go-Back-N and Selective-Repeat receive policies are
//! negotiated at handshake time; congestion control is optional on the
//! sending side.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  SEND|seq|msg|sum   ┌──────────────┐
//!  │ SendWindow │────────────────────▶│  RecvWindow  │
//!  └────┬───────┘                     └──────┬───────┘
//!       │          ACK / NAK / ACK_DUPLICATE │
//!       │◀────────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │            connection             │
//!  │ (driver + reader task + timers)   │
//!  └────┬──────────────────────────────┘
//!       │ framed records
//!  ┌────▼──────┐
//!  │ transport │  (thin async wrapper around tokio TcpStream)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`checksum`]    — code-point-sum integrity values
//! - [`wire`]        — record grammar (serialise / parse / buffer partial reads)
//! - [`packet`]      — the immutable sequenced payload
//! - [`config`]      — variant, window, checksum and NAK conventions, timing knobs
//! - [`congestion`]  — cwnd / ssthresh growth and backoff
//! - [`send_window`] — outbound window state machine
//! - [`recv_window`] — inbound window state machine
//! - [`handshake`]   — one-shot `(variant, window)` negotiation
//! - [`transport`]   — framed TCP reader/writer split
//! - [`timers`]      — per-sequence retransmission task table
//! - [`connection`]  — sender/receiver drivers tying it all together
//! - [`fault`]       — deterministic corrupt-once injection plans

pub mod checksum;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod fault;
pub mod handshake;
pub mod packet;
pub mod recv_window;
pub mod send_window;
pub mod timers;
pub mod transport;
pub mod wire;
