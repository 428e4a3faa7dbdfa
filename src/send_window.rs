//! Send-side sliding-window state machine.
//!
//! [`SendWindow`] owns one [`SendRecord`] per sequence number for the
//! lifetime of a transfer: the packet, its status, and how many times it
//! has been transmitted.  The flow limit is the negotiated window size or,
//! when congestion control is enabled, the smaller of that and `cwnd`.
//!
//! # Contract
//!
//! - A record may be transmitted only while
//!   `sequence <= ack_floor + flow_limit`, except that a NAK always forces
//!   an immediate retransmission regardless of window occupancy.
//! - Acknowledgments are idempotent: a second ACK for the same sequence is
//!   a no-op.
//! - Exhausting the retry budget aborts that record and latches the batch
//!   as failed; no further pending records are released, but records
//!   already acknowledged stay acknowledged.
//!
//! This module only manages state; all I/O and timer scheduling live in
//! [`crate::connection`] (same pattern as the receive side).

use std::collections::{BTreeMap, BTreeSet};

use crate::congestion::CongestionState;
use crate::packet::Packet;

// ---------------------------------------------------------------------------
// SendRecord
// ---------------------------------------------------------------------------

/// Lifecycle of one outbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Admitted but waiting for the flow limit to reach it.
    Pending,
    /// Transmitted at least once, awaiting acknowledgment.
    InFlight,
    /// Confirmed by the peer; terminal.
    Acknowledged,
    /// Retry budget exhausted; terminal.
    Aborted,
}

/// Book-keeping for one outbound packet.
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub packet: Packet,
    pub status: SendStatus,
    /// Total transmissions so far (1 = first send).
    pub attempt_count: u32,
}

// ---------------------------------------------------------------------------
// Outcomes handed back to the connection layer
// ---------------------------------------------------------------------------

/// Result of processing an acknowledgment.
#[derive(Debug, Default)]
pub struct Acked {
    /// `false` for duplicates and unknown sequences (no state changed).
    pub newly_acked: bool,
    /// Pending packets that became eligible and must now be transmitted.
    pub released: Vec<Packet>,
}

/// Result of processing a negative acknowledgment.
#[derive(Debug)]
pub enum NakAction {
    /// Retransmit this packet now, bypassing the flow limit.
    Retransmit {
        packet: Packet,
        /// `true` when the record was still pending and needs a timer armed.
        newly_in_flight: bool,
    },
    /// The sequence is unknown or already terminal; nothing to do.
    Ignore,
}

/// Verdict when a retransmission timer fires.
#[derive(Debug)]
pub enum TimerVerdict {
    /// Still unacknowledged and within budget: resend and re-arm.
    Retransmit(Packet),
    /// Budget exhausted: record aborted, batch latched as failed; the
    /// caller must emit `ABORT|sequence` and stop re-arming.
    Exhausted,
    /// The record reached a terminal state while the timer was in flight;
    /// the firing is a no-op.
    Lapsed,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Send-side window state for one connection.
#[derive(Debug)]
pub struct SendWindow {
    records: BTreeMap<u64, SendRecord>,
    window_size: usize,
    max_retries: u32,
    /// Highest sequence at or below which everything is acknowledged.
    ack_floor: u64,
    congestion: Option<CongestionState>,
    /// Sequence whose retry budget ran out, if any.  Once set, no pending
    /// record is released again.
    failed: Option<u64>,
}

impl SendWindow {
    pub fn new(
        window_size: usize,
        max_retries: u32,
        congestion: Option<CongestionState>,
    ) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            records: BTreeMap::new(),
            window_size,
            max_retries,
            ack_floor: 0,
            congestion,
            failed: None,
        }
    }

    /// Max in-flight span: the negotiated window, further narrowed by the
    /// congestion window when congestion control is enabled.
    pub fn flow_limit(&self) -> u64 {
        let window = self.window_size as u64;
        match &self.congestion {
            Some(c) => window.min(c.cwnd() as u64),
            None => window,
        }
    }

    fn eligible(&self, sequence: u64) -> bool {
        sequence <= self.ack_floor + self.flow_limit()
    }

    /// Admit a packet into the window.
    ///
    /// Returns `true` when the packet should be transmitted immediately
    /// (it was within the flow limit and is now in flight); `false` when it
    /// must wait for earlier acknowledgments.
    pub fn submit(&mut self, packet: Packet) -> bool {
        let sequence = packet.sequence;
        let send_now = self.failed.is_none() && self.eligible(sequence);
        let record = SendRecord {
            packet,
            status: if send_now { SendStatus::InFlight } else { SendStatus::Pending },
            attempt_count: u32::from(send_now),
        };
        self.records.insert(sequence, record);
        send_now
    }

    /// Process an acknowledgment for `sequence`.
    ///
    /// Grows the congestion window, advances the acknowledgment floor, and
    /// releases any pending packets the new flow limit now covers.  A
    /// duplicate acknowledgment changes nothing.
    pub fn on_ack(&mut self, sequence: u64) -> Acked {
        let Some(record) = self.records.get_mut(&sequence) else {
            return Acked::default();
        };
        match record.status {
            SendStatus::Acknowledged | SendStatus::Aborted => return Acked::default(),
            SendStatus::Pending | SendStatus::InFlight => {
                record.status = SendStatus::Acknowledged;
            }
        }

        if let Some(c) = &mut self.congestion {
            c.on_ack(self.window_size as u32);
        }

        // Slide the floor over the new contiguous acknowledged prefix.
        while matches!(
            self.records.get(&(self.ack_floor + 1)).map(|r| r.status),
            Some(SendStatus::Acknowledged)
        ) {
            self.ack_floor += 1;
        }

        Acked { newly_acked: true, released: self.release_pending() }
    }

    /// Process a negative acknowledgment for `sequence`.
    ///
    /// Backs off the congestion window, then orders an immediate
    /// retransmission of the named packet; the flow limit does not apply.
    pub fn on_nak(&mut self, sequence: u64) -> NakAction {
        if let Some(c) = &mut self.congestion {
            c.on_loss();
        }
        let Some(record) = self.records.get_mut(&sequence) else {
            return NakAction::Ignore;
        };
        match record.status {
            SendStatus::Acknowledged | SendStatus::Aborted => NakAction::Ignore,
            SendStatus::InFlight => {
                record.attempt_count += 1;
                NakAction::Retransmit { packet: record.packet.clone(), newly_in_flight: false }
            }
            SendStatus::Pending => {
                record.status = SendStatus::InFlight;
                record.attempt_count += 1;
                NakAction::Retransmit { packet: record.packet.clone(), newly_in_flight: true }
            }
        }
    }

    /// Decide what a fired retransmission timer should do.
    ///
    /// A timer that outlived its record (acknowledged or aborted while the
    /// firing was in flight) lapses without effect.
    pub fn on_timer_expiry(&mut self, sequence: u64) -> TimerVerdict {
        let Some(record) = self.records.get_mut(&sequence) else {
            return TimerVerdict::Lapsed;
        };
        if record.status != SendStatus::InFlight {
            return TimerVerdict::Lapsed;
        }
        if record.attempt_count > self.max_retries {
            record.status = SendStatus::Aborted;
            self.failed.get_or_insert(sequence);
            return TimerVerdict::Exhausted;
        }
        record.attempt_count += 1;
        TimerVerdict::Retransmit(record.packet.clone())
    }

    /// Pending records the current flow limit covers, promoted to in-flight.
    fn release_pending(&mut self) -> Vec<Packet> {
        if self.failed.is_some() {
            return Vec::new();
        }
        let limit = self.ack_floor + self.flow_limit();
        let mut released = Vec::new();
        for (&sequence, record) in self.records.range_mut(..=limit) {
            if record.status == SendStatus::Pending {
                record.status = SendStatus::InFlight;
                record.attempt_count = 1;
                released.push(record.packet.clone());
                debug_assert_eq!(sequence, record.packet.sequence);
            }
        }
        released
    }

    /// Sequence whose retry budget ran out, if the batch has failed.
    pub fn failed(&self) -> Option<u64> {
        self.failed
    }

    /// `true` once every admitted record is acknowledged.
    pub fn all_acknowledged(&self) -> bool {
        self.records.values().all(|r| r.status == SendStatus::Acknowledged)
    }

    /// Number of acknowledged records (the driver's progress measure).
    pub fn acked_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == SendStatus::Acknowledged)
            .count()
    }

    /// The acknowledged sequence numbers, for the final transfer report.
    pub fn acknowledged_set(&self) -> BTreeSet<u64> {
        self.records
            .iter()
            .filter(|(_, r)| r.status == SendStatus::Acknowledged)
            .map(|(&s, _)| s)
            .collect()
    }

    /// Congestion state, when congestion control is enabled.
    pub fn congestion(&self) -> Option<&CongestionState> {
        self.congestion.as_ref()
    }

    #[cfg(test)]
    fn status_of(&self, sequence: u64) -> Option<SendStatus> {
        self.records.get(&sequence).map(|r| r.status)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChecksumWidth;

    fn pkt(sequence: u64) -> Packet {
        Packet::new(sequence, format!("msg-{sequence}"), ChecksumWidth::Sixteen)
    }

    fn window_of(size: usize, count: u64) -> SendWindow {
        let mut w = SendWindow::new(size, 3, None);
        for seq in 1..=count {
            w.submit(pkt(seq));
        }
        w
    }

    #[test]
    fn submit_respects_flow_limit() {
        let mut w = SendWindow::new(4, 3, None);
        for seq in 1..=4 {
            assert!(w.submit(pkt(seq)), "seq {seq} should transmit immediately");
        }
        assert!(!w.submit(pkt(5)), "seq 5 is beyond the window");
        assert_eq!(w.status_of(5), Some(SendStatus::Pending));
    }

    #[test]
    fn ack_advances_floor_and_releases_pending() {
        let mut w = window_of(4, 6);
        let acked = w.on_ack(1);
        assert!(acked.newly_acked);
        assert_eq!(acked.released.len(), 1);
        assert_eq!(acked.released[0].sequence, 5);
        assert_eq!(w.status_of(5), Some(SendStatus::InFlight));
    }

    #[test]
    fn out_of_order_acks_release_nothing_until_gap_closes() {
        let mut w = window_of(4, 6);
        // Floor stays at 0 while seq 1 is outstanding.
        assert!(w.on_ack(3).released.is_empty());
        assert!(w.on_ack(2).released.is_empty());
        // Acking 1 closes the gap: floor jumps to 3, releasing 5 and 6.
        let acked = w.on_ack(1);
        let released: Vec<u64> = acked.released.iter().map(|p| p.sequence).collect();
        assert_eq!(released, vec![5, 6]);
    }

    #[test]
    fn duplicate_ack_is_a_no_op() {
        let mut w = window_of(4, 6);
        assert!(w.on_ack(1).newly_acked);
        let dup = w.on_ack(1);
        assert!(!dup.newly_acked);
        assert!(dup.released.is_empty());
    }

    #[test]
    fn unknown_sequence_ack_is_ignored() {
        let mut w = window_of(4, 2);
        assert!(!w.on_ack(99).newly_acked);
    }

    #[test]
    fn nak_retransmits_in_flight_record() {
        let mut w = window_of(4, 4);
        match w.on_nak(2) {
            NakAction::Retransmit { packet, newly_in_flight } => {
                assert_eq!(packet.sequence, 2);
                assert!(!newly_in_flight);
            }
            NakAction::Ignore => panic!("NAK for in-flight record must retransmit"),
        }
    }

    #[test]
    fn nak_bypasses_flow_limit_for_pending_record() {
        let mut w = window_of(2, 4);
        assert_eq!(w.status_of(4), Some(SendStatus::Pending));
        match w.on_nak(4) {
            NakAction::Retransmit { newly_in_flight, .. } => assert!(newly_in_flight),
            NakAction::Ignore => panic!("NAK must promote a pending record"),
        }
    }

    #[test]
    fn nak_for_acknowledged_record_is_ignored() {
        let mut w = window_of(4, 4);
        w.on_ack(1);
        assert!(matches!(w.on_nak(1), NakAction::Ignore));
    }

    #[test]
    fn timer_expiry_retransmits_within_budget() {
        let mut w = window_of(4, 1);
        for expected_attempts in 2..=4 {
            match w.on_timer_expiry(1) {
                TimerVerdict::Retransmit(p) => assert_eq!(p.sequence, 1),
                other => panic!("expected retransmit, got {other:?}"),
            }
            assert_eq!(
                w.records.get(&1).unwrap().attempt_count,
                expected_attempts
            );
        }
    }

    #[test]
    fn exhausted_budget_aborts_record_and_latches_failure() {
        let mut w = window_of(4, 6);
        // max_retries = 3: three retransmissions succeed, the fourth firing
        // exhausts the budget.
        for _ in 0..3 {
            assert!(matches!(w.on_timer_expiry(1), TimerVerdict::Retransmit(_)));
        }
        assert!(matches!(w.on_timer_expiry(1), TimerVerdict::Exhausted));
        assert_eq!(w.status_of(1), Some(SendStatus::Aborted));
        assert_eq!(w.failed(), Some(1));

        // Failed batch: further acks release nothing.
        let acked = w.on_ack(2);
        assert!(acked.newly_acked, "already-sent packets may still be acked");
        assert!(acked.released.is_empty(), "failed batch must not release");
    }

    #[test]
    fn timer_after_ack_lapses() {
        let mut w = window_of(4, 1);
        w.on_ack(1);
        assert!(matches!(w.on_timer_expiry(1), TimerVerdict::Lapsed));
    }

    #[test]
    fn congestion_narrows_the_flow_limit() {
        let mut w = SendWindow::new(4, 3, Some(CongestionState::new(16)));
        assert_eq!(w.flow_limit(), 1, "cwnd starts at 1");
        assert!(w.submit(pkt(1)));
        assert!(!w.submit(pkt(2)), "second packet must wait for cwnd growth");

        let acked = w.on_ack(1); // cwnd -> 2, floor -> 1
        assert_eq!(acked.released.len(), 1);
        assert_eq!(w.flow_limit(), 2);
    }

    #[test]
    fn nak_collapses_congestion_window() {
        let mut w = SendWindow::new(8, 3, Some(CongestionState::new(16)));
        for seq in 1..=6 {
            w.submit(pkt(seq));
        }
        for seq in 1..=5 {
            w.on_ack(seq); // cwnd grows 1 -> 6
        }
        assert_eq!(w.congestion().unwrap().cwnd(), 6);
        w.on_nak(6);
        assert_eq!(w.congestion().unwrap().cwnd(), 1);
        assert_eq!(w.congestion().unwrap().ssthresh(), 3);
    }

    #[test]
    fn transfer_completion_and_report() {
        let mut w = window_of(4, 3);
        assert!(!w.all_acknowledged());
        for seq in 1..=3 {
            w.on_ack(seq);
        }
        assert!(w.all_acknowledged());
        assert_eq!(w.acked_count(), 3);
        assert_eq!(
            w.acknowledged_set().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn empty_window_counts_as_complete() {
        let w = SendWindow::new(4, 3, None);
        assert!(w.all_acknowledged());
    }
}
