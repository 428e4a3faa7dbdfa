//! The unit of transfer: an immutable payload with its integrity value.
//!
//! A [`Packet`] is constructed once per sequence number and never mutated;
//! the checksum is a pure function of the payload.  Retransmissions reuse
//! the same packet unchanged.

use crate::checksum;
use crate::config::ChecksumWidth;
use crate::wire::Frame;

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One sequenced message, checksummed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 1-based position in the transfer.
    pub sequence: u64,
    pub payload: String,
    pub checksum: u16,
}

impl Packet {
    /// Build a packet, computing the checksum over `payload`.
    pub fn new(sequence: u64, payload: impl Into<String>, width: ChecksumWidth) -> Self {
        let payload = payload.into();
        let checksum = checksum::compute(&payload, width);
        Self { sequence, payload, checksum }
    }

    /// The ordinary `SEND` rendition of this packet.
    pub fn frame(&self) -> Frame {
        Frame::Data {
            sequence: self.sequence,
            payload: self.payload.clone(),
            checksum: self.checksum,
        }
    }

    /// The `ERR` rendition used for simulated corruption: the content is
    /// garbled while the checksum still describes the original payload, so
    /// verification at the receiver is guaranteed to fail.
    pub fn corrupted_frame(&self) -> Frame {
        Frame::Corrupt {
            sequence: self.sequence,
            payload: garble(&self.payload),
            checksum: self.checksum,
        }
    }
}

/// Deterministically alter a payload so its code-point sum changes.
///
/// Reversal alone would not do: the sum is order-independent.  The first
/// character of the reversed text is therefore replaced with a marker that
/// differs from it.
fn garble(payload: &str) -> String {
    let mut reversed: Vec<char> = payload.chars().rev().collect();
    match reversed.first() {
        None => "#".to_string(),
        Some('#') => {
            reversed[0] = '%';
            reversed.into_iter().collect()
        }
        Some(_) => {
            reversed[0] = '#';
            reversed.into_iter().collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
