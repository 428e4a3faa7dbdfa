//! Connection-opening negotiation.
//!
//! Before any data flows, both peers must agree on the protocol variant
//! and the window size.  The initiator states its terms; the responder
//! accepts only an exact match and otherwise closes the connection, which
//! the initiator must treat as a fatal setup error.  There is no retry and
//! no counter-offer: `AwaitingHandshake` resolves to `Negotiated` or
//! `Rejected`, both terminal.

use crate::config::ProtocolVariant;
use crate::connection::ConnectionError;
use crate::transport::{FrameReader, FrameWriter};
use crate::wire::Frame;

// ---------------------------------------------------------------------------
// HandshakeAgreement
// ---------------------------------------------------------------------------

/// The negotiated terms; immutable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeAgreement {
    pub variant: ProtocolVariant,
    pub window_size: usize,
}

impl std::fmt::Display for HandshakeAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PROTOCOL|{}|WINDOW|{}", self.variant, self.window_size)
    }
}

/// Exact-match review of an inbound offer against this side's terms.
pub fn review_offer(offer: &HandshakeAgreement, configured: &HandshakeAgreement) -> bool {
    offer == configured
}

// ---------------------------------------------------------------------------
// Initiator / responder
// ---------------------------------------------------------------------------

/// Open the negotiation from the connecting side.
///
/// Sends the offer and waits for the confirmation echo.  Any reply other
/// than an exact `ACK_HANDSHAKE` echo (including the peer closing the
/// connection, which is how a responder refuses) is fatal.
pub async fn initiate(
    reader: &mut FrameReader,
    writer: &FrameWriter,
    terms: HandshakeAgreement,
) -> Result<HandshakeAgreement, ConnectionError> {
    writer.send(Frame::Handshake {
        variant: terms.variant,
        window: terms.window_size,
    })?;
    log::debug!("[handshake] offered {terms}");

    match reader.next_frame_strict().await {
        Ok(Some(Frame::HandshakeAck { variant, window }))
            if review_offer(&HandshakeAgreement { variant, window_size: window }, &terms) =>
        {
            log::info!("[handshake] negotiated {terms}");
            Ok(terms)
        }
        Ok(Some(frame)) => {
            log::warn!("[handshake] unexpected reply: {frame}");
            Err(ConnectionError::HandshakeRejected)
        }
        Ok(None) => {
            log::warn!("[handshake] peer closed the connection");
            Err(ConnectionError::HandshakeRejected)
        }
        Err(e) => {
            log::warn!("[handshake] reply unreadable: {e}");
            Err(ConnectionError::HandshakeRejected)
        }
    }
}

/// Answer the negotiation from the accepting side.
///
/// Reads the first record on the connection.  A well-formed offer matching
/// this side's configuration is confirmed; anything else (mismatched
/// terms, a malformed greeting, or a different record type) rejects the
/// connection, and returning the error drops the transport halves, which
/// closes the stream under the initiator.
pub async fn respond(
    reader: &mut FrameReader,
    writer: &FrameWriter,
    configured: HandshakeAgreement,
) -> Result<HandshakeAgreement, ConnectionError> {
    let offer = match reader.next_frame_strict().await {
        Ok(Some(Frame::Handshake { variant, window })) => {
            HandshakeAgreement { variant, window_size: window }
        }
        Ok(Some(frame)) => {
            log::warn!("[handshake] expected HANDSHAKE, got {frame}");
            return Err(ConnectionError::HandshakeMismatch {
                offered: frame.to_string(),
                configured: configured.to_string(),
            });
        }
        Ok(None) => {
            log::warn!("[handshake] peer closed before offering");
            return Err(ConnectionError::HandshakeRejected);
        }
        Err(e) => {
            log::warn!("[handshake] offer unreadable: {e}");
            return Err(ConnectionError::HandshakeRejected);
        }
    };

    if !review_offer(&offer, &configured) {
        log::warn!("[handshake] refusing offer {offer}, configured {configured}");
        return Err(ConnectionError::HandshakeMismatch {
            offered: offer.to_string(),
            configured: configured.to_string(),
        });
    }

    writer.send(Frame::HandshakeAck {
        variant: configured.variant,
        window: configured.window_size,
    })?;
    log::info!("[handshake] negotiated {configured}");
    Ok(configured)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
