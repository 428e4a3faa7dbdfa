//! Receive-side sliding-window state machine.
//!
//! [`RecvWindow`] owns the expected-sequence cursor, the acceptance window
//! derived from it, the reorder buffer, and the sets of delivered and
//! abandoned sequence numbers.  [`RecvWindow::on_packet`] classifies every
//! arrival and returns the actions the caller must perform (deliver a
//! payload, write a reply frame); no I/O happens here, same as the send
//! side.
//!
//! # Classification order
//!
//! 1. Bad checksum: NAK the offending sequence, touch nothing.
//! 2. Expected sequence: deliver, ACK, advance, then drain the reorder
//!    buffer cumulatively.
//! 3. Already delivered: answer `ACK_DUPLICATE` without re-delivering.
//! 4. In-window but ahead of the cursor: Selective-Repeat buffers it and
//!    NAKs the gap; Go-Back-N discards it silently and leaves recovery to
//!    the sender's timers.
//! 5. Everything else is out of window: NAK (addressing per
//!    [`NakPolicy`]), no state change.

use std::collections::{BTreeMap, HashSet};

use crate::checksum;
use crate::config::{ChecksumWidth, NakPolicy, ProtocolConfig, ProtocolVariant};
use crate::wire::{control_checksum, Frame};

// ---------------------------------------------------------------------------
// RecvAction
// ---------------------------------------------------------------------------

/// One step the connection layer must take after an arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvAction {
    /// Hand this payload to the application, in order, exactly once.
    Deliver { sequence: u64, payload: String },
    /// Write this control frame back to the peer.
    Reply(Frame),
}

// ---------------------------------------------------------------------------
// RecvWindow
// ---------------------------------------------------------------------------

/// Receive-side window state for one connection.
#[derive(Debug)]
pub struct RecvWindow {
    /// Next sequence the application is owed.  Never decreases.
    expected: u64,
    window_size: usize,
    variant: ProtocolVariant,
    nak_policy: NakPolicy,
    checksum_width: ChecksumWidth,
    /// In-window arrivals ahead of the cursor, keyed by sequence.
    reorder: BTreeMap<u64, String>,
    /// Sequences already delivered and acknowledged.
    delivered: HashSet<u64>,
    /// Sequences the sender aborted; excluded from the window forever.
    abandoned: HashSet<u64>,
}

impl RecvWindow {
    pub fn new(config: &ProtocolConfig) -> Self {
        assert!(config.window_size >= 1, "window_size must be at least 1");
        Self {
            expected: 1,
            window_size: config.window_size,
            variant: config.variant,
            nak_policy: config.nak_policy,
            checksum_width: config.checksum_width,
            reorder: BTreeMap::new(),
            delivered: HashSet::new(),
            abandoned: HashSet::new(),
        }
    }

    /// The half-open acceptance window `[expected, expected + window_size)`.
    pub fn acceptable_range(&self) -> (u64, u64) {
        (self.expected, self.expected + self.window_size as u64)
    }

    pub fn expected_sequence(&self) -> u64 {
        self.expected
    }

    /// `true` while out-of-order payloads are parked ahead of the cursor.
    pub fn has_buffered(&self) -> bool {
        !self.reorder.is_empty()
    }

    /// Classify an arrival and return the actions it requires.
    pub fn on_packet(&mut self, sequence: u64, payload: &str, claimed: u16) -> Vec<RecvAction> {
        // Rule 1: integrity first.  A corrupt duplicate must not disturb
        // the record already delivered under this sequence number.
        if !checksum::verify(payload, claimed, self.checksum_width) {
            return vec![self.nak(sequence)];
        }

        // Rule 2: the packet the cursor is waiting for.
        if sequence == self.expected {
            let mut actions = Vec::new();
            self.deliver(sequence, payload.to_string(), &mut actions);
            self.drain(&mut actions);
            return actions;
        }

        // Rule 3: duplicate of something already delivered.
        if self.delivered.contains(&sequence) {
            return vec![RecvAction::Reply(Frame::AckDuplicate { sequence })];
        }

        // Rule 4: ahead of the cursor but inside the window (and not a
        // sequence the sender has given up on).
        let (_, window_end) = self.acceptable_range();
        if sequence < window_end && sequence > self.expected && !self.abandoned.contains(&sequence)
        {
            return match self.variant {
                ProtocolVariant::SelectiveRepeat => {
                    self.reorder.insert(sequence, payload.to_string());
                    // NAK the gap, not the arrival: name the packet the
                    // sender should resupply.
                    vec![RecvAction::Reply(Frame::Nak {
                        sequence: self.expected,
                        checksum: Some(control_checksum(self.expected, self.checksum_width)),
                    })]
                }
                ProtocolVariant::GoBackN => {
                    // Discard; the sender's timeout will resend the tail.
                    Vec::new()
                }
            };
        }

        // Rule 5: outside the window.
        let named = match self.nak_policy {
            NakPolicy::OffendingSequence => sequence,
            NakPolicy::ExpectedSequence => self.expected,
        };
        vec![self.nak(named)]
    }

    /// The sender gave up on `sequence`: drop any buffered copy and exclude
    /// it from the window permanently.  If the cursor itself was waiting on
    /// the abandoned sequence, it steps over the hole, which may unlock
    /// buffered successors.
    pub fn on_abort(&mut self, sequence: u64) -> Vec<RecvAction> {
        self.reorder.remove(&sequence);
        self.abandoned.insert(sequence);
        let mut actions = Vec::new();
        if sequence == self.expected {
            self.drain(&mut actions);
        }
        actions
    }

    fn deliver(&mut self, sequence: u64, payload: String, actions: &mut Vec<RecvAction>) {
        self.delivered.insert(sequence);
        actions.push(RecvAction::Deliver { sequence, payload });
        actions.push(RecvAction::Reply(Frame::Ack {
            sequence,
            checksum: Some(control_checksum(sequence, self.checksum_width)),
        }));
        self.expected += 1;
    }

    /// Advance the cursor over abandoned holes and buffered payloads until
    /// it rests on a sequence that is genuinely missing.
    fn drain(&mut self, actions: &mut Vec<RecvAction>) {
        loop {
            if self.abandoned.contains(&self.expected) {
                self.expected += 1;
            } else if let Some(payload) = self.reorder.remove(&self.expected) {
                self.deliver(self.expected, payload, actions);
            } else {
                break;
            }
        }
    }

    fn nak(&self, sequence: u64) -> RecvAction {
        RecvAction::Reply(Frame::Nak {
            sequence,
            checksum: Some(control_checksum(sequence, self.checksum_width)),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
