//! Congestion-window growth and backoff.
//!
//! [`CongestionState`] tracks `cwnd` and `ssthresh` in the classic two-mode
//! scheme: while `cwnd < ssthresh` the window is in slow start and grows by
//! one per acknowledgment; at or past the threshold growth continues one
//! per acknowledgment but is capped at the negotiated window size.  A
//! negative acknowledgment halves the threshold and collapses the window
//! back to one.
//!
//! This module only manages state; the sender window manager consults
//! [`CongestionState::cwnd`] when computing its flow limit.

// ---------------------------------------------------------------------------
// CongestionMode
// ---------------------------------------------------------------------------

/// Which growth regime the window is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionMode {
    SlowStart,
    CongestionAvoidance,
}

// ---------------------------------------------------------------------------
// CongestionState
// ---------------------------------------------------------------------------

/// Congestion-control state for one connection.
///
/// Invariant: `cwnd >= 1` at all times.
#[derive(Debug, Clone)]
pub struct CongestionState {
    cwnd: u32,
    ssthresh: u32,
    mode: CongestionMode,
}

impl CongestionState {
    /// Start at `cwnd = 1` in slow start.
    pub fn new(initial_ssthresh: u32) -> Self {
        Self {
            cwnd: 1,
            ssthresh: initial_ssthresh.max(1),
            mode: CongestionMode::SlowStart,
        }
    }

    /// Current congestion window (max in-flight packets it permits).
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn mode(&self) -> CongestionMode {
        self.mode
    }

    /// Grow the window on a new acknowledgment.
    ///
    /// `max_window` is the negotiated window size; congestion-avoidance
    /// growth never exceeds it.
    pub fn on_ack(&mut self, max_window: u32) {
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
        } else {
            self.cwnd = (self.cwnd + 1).min(max_window.max(1));
        }
        self.mode = if self.cwnd < self.ssthresh {
            CongestionMode::SlowStart
        } else {
            CongestionMode::CongestionAvoidance
        };
    }

    /// Back off on a negative acknowledgment: halve the threshold (floor 1),
    /// collapse the window to one, re-enter slow start.
    pub fn on_loss(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = 1;
        self.mode = CongestionMode::SlowStart;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
