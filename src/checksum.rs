//! Message integrity checksums.
//!
//! The checksum of a payload is the sum of its character code points,
//! truncated to the configured width (16 bits by default, 8 bits for peers
//! speaking the modulo-256 convention).  Pure data transformation; no I/O
//! happens here.

use crate::config::ChecksumWidth;

/// Compute the checksum of `payload`.
///
/// Deterministic and side-effect free: for every payload `p`,
/// `verify(p, compute(p, w), w)` holds.
pub fn compute(payload: &str, width: ChecksumWidth) -> u16 {
    let sum = payload
        .chars()
        .fold(0u32, |acc, c| acc.wrapping_add(c as u32));
    (sum & width.mask()) as u16
}

/// Check a claimed checksum against the payload's actual one.
pub fn verify(payload: &str, claimed: u16, width: ChecksumWidth) -> bool {
    compute(payload, width) == claimed
}
