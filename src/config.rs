//! Configuration types shared by both endpoints.
//!
//! Everything the protocol leaves to the operator lives here: the
//! variant, window size, checksum width, NAK addressing convention, and
//! the sender's timing/retry knobs.  Both peers must be
//! configured with the same [`ProtocolConfig`]; the handshake enforces the
//! `(variant, window_size)` half of that agreement on the wire.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::handshake::HandshakeAgreement;

// ---------------------------------------------------------------------------
// ProtocolVariant
// ---------------------------------------------------------------------------

/// Which out-of-order policy the receiver runs.
///
/// The variant is negotiated once at handshake time and is immutable for the
/// connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Accept only the expected sequence; discard everything else and rely
    /// on the sender's retransmission timers to refill the window.
    GoBackN,
    /// Buffer in-window out-of-order packets and NAK the gap so the sender
    /// can retransmit exactly the missing one.
    SelectiveRepeat,
}

impl ProtocolVariant {
    /// The token used on the wire (`HANDSHAKE|PROTOCOL|<token>|...`).
    pub fn token(&self) -> &'static str {
        match self {
            ProtocolVariant::GoBackN => "GBN",
            ProtocolVariant::SelectiveRepeat => "SR",
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GBN" => Ok(ProtocolVariant::GoBackN),
            "SR" => Ok(ProtocolVariant::SelectiveRepeat),
            _ => Err(format!("unknown protocol variant: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ChecksumWidth
// ---------------------------------------------------------------------------

/// Width of the code-point-sum checksum.
///
/// Sixteen bits is the default; eight bits (modulo 256) is kept as an
/// explicit configuration for peers that still speak the narrower sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumWidth {
    Eight,
    #[default]
    Sixteen,
}

impl ChecksumWidth {
    /// Bitmask that truncates a running sum to this width.
    pub fn mask(&self) -> u32 {
        match self {
            ChecksumWidth::Eight => 0xff,
            ChecksumWidth::Sixteen => 0xffff,
        }
    }
}

// ---------------------------------------------------------------------------
// NakPolicy
// ---------------------------------------------------------------------------

/// Which sequence number an out-of-window NAK carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NakPolicy {
    /// NAK names the sequence of the offending packet (the default).
    #[default]
    OffendingSequence,
    /// NAK names the receiver's current expected sequence instead.
    ExpectedSequence,
}

// ---------------------------------------------------------------------------
// ProtocolConfig
// ---------------------------------------------------------------------------

/// Per-connection protocol parameters common to both endpoints.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub variant: ProtocolVariant,
    /// Sliding-window size N (>= 1); also the handshake's WINDOW token.
    pub window_size: usize,
    pub checksum_width: ChecksumWidth,
    pub nak_policy: NakPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::SelectiveRepeat,
            window_size: 4,
            checksum_width: ChecksumWidth::default(),
            nak_policy: NakPolicy::default(),
        }
    }
}

impl ProtocolConfig {
    /// The `(variant, window)` pair this endpoint will insist on during the
    /// handshake.
    pub fn agreement(&self) -> HandshakeAgreement {
        HandshakeAgreement {
            variant: self.variant,
            window_size: self.window_size,
        }
    }
}

// ---------------------------------------------------------------------------
// CongestionConfig
// ---------------------------------------------------------------------------

/// Knobs for the optional congestion controller.
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    /// Slow-start threshold at connection start.
    pub initial_ssthresh: u32,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self { initial_ssthresh: 16 }
    }
}

// ---------------------------------------------------------------------------
// SenderConfig
// ---------------------------------------------------------------------------

/// Everything the sending endpoint needs beyond [`ProtocolConfig`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub protocol: ProtocolConfig,
    /// Fixed per-record retransmission timeout.
    pub retransmit_timeout: Duration,
    /// Maximum retransmissions per record; a record is transmitted at most
    /// `1 + max_retries` times before it is aborted.
    pub max_retries: u32,
    /// Consecutive no-progress poll cycles tolerated before the whole
    /// connection is declared dead.
    pub stall_limit: u32,
    /// How often the transfer driver polls the window for progress.
    pub poll_interval: Duration,
    /// `Some` enables congestion control; the flow limit becomes
    /// `min(window_size, cwnd)`.
    pub congestion: Option<CongestionConfig>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            retransmit_timeout: Duration::from_secs(3),
            max_retries: 3,
            stall_limit: 24,
            poll_interval: Duration::from_millis(500),
            congestion: None,
        }
    }
}
