//! Wire-format definitions for protocol records.
//!
//! Every message exchanged between peers is one ASCII record: fields joined
//! by `|` and terminated by `\n`.  This module is responsible for:
//! - Defining the record vocabulary as the typed [`Frame`] enum.
//! - Serialising a [`Frame`] into a delimiter-terminated line.
//! - Parsing a received line back into a [`Frame`], returning errors for
//!   malformed input (the caller logs and drops those; they are never fatal
//!   to the connection).
//! - Buffering partial reads ([`FrameBuffer`]): the transport may deliver a
//!   fraction of a record, or several records, per read.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Record grammar
//!
//! ```text
//! HANDSHAKE|PROTOCOL|<SR|GBN>|WINDOW|<int>
//! ACK_HANDSHAKE|PROTOCOL|<SR|GBN>|WINDOW|<int>
//! SEND|<seq>|<content>|<checksum>
//! ERR|<seq>|<garbled-content>|<checksum>      (simulated corruption)
//! ACK|<seq>[|<checksum>]
//! NAK|<seq>[|<checksum>]
//! ACK_DUPLICATE|<seq>
//! ABORT|<seq>[|FAILED]
//! ```
//!
//! The optional checksum on `ACK`/`NAK` covers the decimal sequence text,
//! so the control record itself is integrity-checked.  Content must not
//! contain the field or record delimiter; encoding rejects such payloads.

use std::fmt;

use thiserror::Error;

use crate::checksum;
use crate::config::{ChecksumWidth, ProtocolVariant};

/// Field separator within a record.
pub const FIELD_DELIMITER: char = '|';

/// Record terminator on the wire.
pub const RECORD_DELIMITER: u8 = b'\n';

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One fully-parsed protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Initiator's opening offer.
    Handshake { variant: ProtocolVariant, window: usize },
    /// Responder's exact-match confirmation.
    HandshakeAck { variant: ProtocolVariant, window: usize },
    /// An ordinary data packet.
    Data { sequence: u64, payload: String, checksum: u16 },
    /// A deliberately corrupted data packet (`ERR` on the wire).  Receivers
    /// process it exactly like [`Frame::Data`]; the checksum simply fails.
    Corrupt { sequence: u64, payload: String, checksum: u16 },
    /// Positive acknowledgment.
    Ack { sequence: u64, checksum: Option<u16> },
    /// Negative acknowledgment; prompts an immediate retransmission.
    Nak { sequence: u64, checksum: Option<u16> },
    /// Acknowledgment of a packet that was already delivered earlier.
    AckDuplicate { sequence: u64 },
    /// The sender has permanently given up on this sequence number.
    Abort { sequence: u64, failed: bool },
}

impl fmt::Display for Frame {
    /// The record text, without the trailing record delimiter.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Handshake { variant, window } => {
                write!(f, "HANDSHAKE|PROTOCOL|{variant}|WINDOW|{window}")
            }
            Frame::HandshakeAck { variant, window } => {
                write!(f, "ACK_HANDSHAKE|PROTOCOL|{variant}|WINDOW|{window}")
            }
            Frame::Data { sequence, payload, checksum } => {
                write!(f, "SEND|{sequence}|{payload}|{checksum}")
            }
            Frame::Corrupt { sequence, payload, checksum } => {
                write!(f, "ERR|{sequence}|{payload}|{checksum}")
            }
            Frame::Ack { sequence, checksum: Some(c) } => write!(f, "ACK|{sequence}|{c}"),
            Frame::Ack { sequence, checksum: None } => write!(f, "ACK|{sequence}"),
            Frame::Nak { sequence, checksum: Some(c) } => write!(f, "NAK|{sequence}|{c}"),
            Frame::Nak { sequence, checksum: None } => write!(f, "NAK|{sequence}"),
            Frame::AckDuplicate { sequence } => write!(f, "ACK_DUPLICATE|{sequence}"),
            Frame::Abort { sequence, failed: true } => write!(f, "ABORT|{sequence}|FAILED"),
            Frame::Abort { sequence, failed: false } => write!(f, "ABORT|{sequence}"),
        }
    }
}

/// Checksum carried by control records: computed over the decimal sequence
/// text rather than a payload, which control records do not have.
pub fn control_checksum(sequence: u64, width: ChecksumWidth) -> u16 {
    checksum::compute(&sequence.to_string(), width)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a record can fail to parse or encode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("record type `{0}` is not part of the protocol")]
    UnknownType(String),
    #[error("record `{0}` has the wrong field count for its type")]
    FieldCount(String),
    #[error("field `{0}` is not a valid number")]
    BadNumber(String),
    #[error("token `{0}` out of place in record")]
    BadToken(String),
    #[error("payload contains a reserved delimiter")]
    ReservedDelimiter,
}

/// Reject payloads that would break the record framing.
pub fn validate_payload(payload: &str) -> Result<(), WireError> {
    if payload.contains(FIELD_DELIMITER) || payload.contains(RECORD_DELIMITER as char) {
        return Err(WireError::ReservedDelimiter);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Serialise `frame` into a record line, trailing delimiter included.
pub fn encode(frame: &Frame) -> Result<String, WireError> {
    if let Frame::Data { payload, .. } | Frame::Corrupt { payload, .. } = frame {
        validate_payload(payload)?;
    }
    Ok(format!("{frame}\n"))
}

/// Parse one record (without its trailing delimiter) into a [`Frame`].
pub fn decode(record: &str) -> Result<Frame, WireError> {
    let fields: Vec<&str> = record.split(FIELD_DELIMITER).collect();
    match fields[0] {
        "HANDSHAKE" => {
            let (variant, window) = decode_handshake_fields(record, &fields)?;
            Ok(Frame::Handshake { variant, window })
        }
        "ACK_HANDSHAKE" => {
            let (variant, window) = decode_handshake_fields(record, &fields)?;
            Ok(Frame::HandshakeAck { variant, window })
        }
        "SEND" | "ERR" => {
            if fields.len() != 4 {
                return Err(WireError::FieldCount(record.to_string()));
            }
            let sequence = parse_sequence(fields[1])?;
            let checksum = parse_u16(fields[3])?;
            let payload = fields[2].to_string();
            if fields[0] == "SEND" {
                Ok(Frame::Data { sequence, payload, checksum })
            } else {
                Ok(Frame::Corrupt { sequence, payload, checksum })
            }
        }
        "ACK" | "NAK" => {
            if fields.len() != 2 && fields.len() != 3 {
                return Err(WireError::FieldCount(record.to_string()));
            }
            let sequence = parse_sequence(fields[1])?;
            let checksum = match fields.get(2) {
                Some(c) => Some(parse_u16(c)?),
                None => None,
            };
            if fields[0] == "ACK" {
                Ok(Frame::Ack { sequence, checksum })
            } else {
                Ok(Frame::Nak { sequence, checksum })
            }
        }
        "ACK_DUPLICATE" => {
            if fields.len() != 2 {
                return Err(WireError::FieldCount(record.to_string()));
            }
            Ok(Frame::AckDuplicate { sequence: parse_sequence(fields[1])? })
        }
        "ABORT" => {
            let failed = match fields.len() {
                2 => false,
                3 if fields[2] == "FAILED" => true,
                3 => return Err(WireError::BadToken(fields[2].to_string())),
                _ => return Err(WireError::FieldCount(record.to_string())),
            };
            Ok(Frame::Abort { sequence: parse_sequence(fields[1])?, failed })
        }
        other => Err(WireError::UnknownType(other.to_string())),
    }
}

/// Shared tail of `HANDSHAKE` / `ACK_HANDSHAKE` parsing:
/// `...|PROTOCOL|<variant>|WINDOW|<int>` with a window of at least 1.
fn decode_handshake_fields(
    record: &str,
    fields: &[&str],
) -> Result<(ProtocolVariant, usize), WireError> {
    if fields.len() != 5 {
        return Err(WireError::FieldCount(record.to_string()));
    }
    if fields[1] != "PROTOCOL" {
        return Err(WireError::BadToken(fields[1].to_string()));
    }
    if fields[3] != "WINDOW" {
        return Err(WireError::BadToken(fields[3].to_string()));
    }
    let variant = fields[2]
        .parse::<ProtocolVariant>()
        .map_err(|_| WireError::BadToken(fields[2].to_string()))?;
    let window: usize = fields[4]
        .parse()
        .map_err(|_| WireError::BadNumber(fields[4].to_string()))?;
    if window == 0 {
        return Err(WireError::BadNumber(fields[4].to_string()));
    }
    Ok((variant, window))
}

fn parse_sequence(field: &str) -> Result<u64, WireError> {
    let sequence: u64 = field
        .parse()
        .map_err(|_| WireError::BadNumber(field.to_string()))?;
    if sequence == 0 {
        return Err(WireError::BadNumber(field.to_string()));
    }
    Ok(sequence)
}

fn parse_u16(field: &str) -> Result<u16, WireError> {
    field.parse().map_err(|_| WireError::BadNumber(field.to_string()))
}

// ---------------------------------------------------------------------------
// FrameBuffer
// ---------------------------------------------------------------------------

/// Accumulates raw transport bytes and yields complete records.
///
/// The transport may deliver a partial record, or several records, per
/// read.  Bytes after the last record delimiter are retained across calls,
/// so no partial data is ever lost between reads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read transport bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete record, delimiter stripped, or `None` if only
    /// a partial record is buffered.
    pub fn next_record(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == RECORD_DELIMITER)?;
        let line: Vec<u8> = self.pending.drain(..=end).take(end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_record_round_trip() {
        let frame = Frame::Data {
            sequence: 7,
            payload: "hello".into(),
            checksum: 532,
        };
        let line = encode(&frame).unwrap();
        assert_eq!(line, "SEND|7|hello|532\n");
        assert_eq!(decode(line.trim_end()).unwrap(), frame);
    }

    #[test]
    fn corrupt_record_round_trip() {
        let frame = Frame::Corrupt {
            sequence: 2,
            payload: "#lleh".into(),
            checksum: 532,
        };
        let line = encode(&frame).unwrap();
        assert!(line.starts_with("ERR|2|"));
        assert_eq!(decode(line.trim_end()).unwrap(), frame);
    }

    #[test]
    fn handshake_round_trip() {
        let frame = Frame::Handshake {
            variant: ProtocolVariant::SelectiveRepeat,
            window: 4,
        };
        let line = encode(&frame).unwrap();
        assert_eq!(line, "HANDSHAKE|PROTOCOL|SR|WINDOW|4\n");
        assert_eq!(decode(line.trim_end()).unwrap(), frame);
    }

    #[test]
    fn control_records_round_trip() {
        for frame in [
            Frame::Ack { sequence: 3, checksum: Some(51) },
            Frame::Ack { sequence: 3, checksum: None },
            Frame::Nak { sequence: 9, checksum: None },
            Frame::AckDuplicate { sequence: 12 },
            Frame::Abort { sequence: 5, failed: true },
            Frame::Abort { sequence: 5, failed: false },
        ] {
            let line = encode(&frame).unwrap();
            assert_eq!(decode(line.trim_end()).unwrap(), frame, "{line:?}");
        }
    }

    #[test]
    fn too_few_fields_is_malformed() {
        assert_eq!(
            decode("SEND|1|content"),
            Err(WireError::FieldCount("SEND|1|content".into()))
        );
        assert!(matches!(decode("ACK"), Err(WireError::FieldCount(_))));
    }

    #[test]
    fn unknown_type_is_malformed() {
        assert_eq!(decode("PING|1"), Err(WireError::UnknownType("PING".into())));
    }

    #[test]
    fn sequence_zero_is_malformed() {
        assert!(matches!(decode("SEND|0|x|120"), Err(WireError::BadNumber(_))));
        assert!(matches!(decode("ACK|0"), Err(WireError::BadNumber(_))));
    }

    #[test]
    fn non_numeric_fields_are_malformed() {
        assert!(matches!(decode("SEND|one|x|120"), Err(WireError::BadNumber(_))));
        assert!(matches!(decode("SEND|1|x|lots"), Err(WireError::BadNumber(_))));
    }

    #[test]
    fn handshake_with_misplaced_tokens_is_malformed() {
        assert!(matches!(
            decode("HANDSHAKE|WINDOW|SR|PROTOCOL|4"),
            Err(WireError::BadToken(_))
        ));
        assert!(matches!(
            decode("HANDSHAKE|PROTOCOL|TCP|WINDOW|4"),
            Err(WireError::BadToken(_))
        ));
        assert!(matches!(
            decode("HANDSHAKE|PROTOCOL|SR|WINDOW|0"),
            Err(WireError::BadNumber(_))
        ));
    }

    #[test]
    fn abort_with_unknown_suffix_is_malformed() {
        assert!(matches!(decode("ABORT|5|OOPS"), Err(WireError::BadToken(_))));
    }

    #[test]
    fn payload_with_delimiter_is_rejected_at_encode() {
        let frame = Frame::Data {
            sequence: 1,
            payload: "a|b".into(),
            checksum: 0,
        };
        assert_eq!(encode(&frame), Err(WireError::ReservedDelimiter));
    }

    #[test]
    fn buffer_handles_partial_records() {
        let mut buf = FrameBuffer::new();
        buf.push(b"ACK|");
        assert_eq!(buf.next_record(), None);
        buf.push(b"1\nNAK|2");
        assert_eq!(buf.next_record(), Some("ACK|1".to_string()));
        assert_eq!(buf.next_record(), None);
        buf.push(b"\n");
        assert_eq!(buf.next_record(), Some("NAK|2".to_string()));
    }

    #[test]
    fn buffer_yields_multiple_records_from_one_read() {
        let mut buf = FrameBuffer::new();
        buf.push(b"ACK|1\nACK|2\nACK|3\n");
        assert_eq!(buf.next_record(), Some("ACK|1".to_string()));
        assert_eq!(buf.next_record(), Some("ACK|2".to_string()));
        assert_eq!(buf.next_record(), Some("ACK|3".to_string()));
        assert_eq!(buf.next_record(), None);
    }

    #[test]
    fn control_checksum_covers_sequence_text() {
        // "12" -> '1' + '2' = 49 + 50 = 99
        assert_eq!(control_checksum(12, ChecksumWidth::Sixteen), 99);
    }
}
