//! Integration tests for the connection-opening negotiation.
//!
//! Each test binds a real TCP listener on loopback, runs the receiver half
//! in a background task, and checks which side of the
//! `Negotiated | Rejected` outcome both endpoints land on.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use sliding_window::config::{ProtocolConfig, ProtocolVariant, SenderConfig};
use sliding_window::connection::{ConnectionError, ReceiverConnection, SenderConnection};
use sliding_window::fault::FaultPlan;
use sliding_window::transport::Listener;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind_loopback() -> Listener {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Listener::bind(addr).await.expect("bind listener")
}

fn protocol(variant: ProtocolVariant, window_size: usize) -> ProtocolConfig {
    ProtocolConfig { variant, window_size, ..ProtocolConfig::default() }
}

fn sender_config(variant: ProtocolVariant, window_size: usize) -> SenderConfig {
    SenderConfig {
        protocol: protocol(variant, window_size),
        ..SenderConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Matching terms: both sides reach the negotiated state.
#[tokio::test]
async fn matching_terms_negotiate() {
    let listener = bind_loopback().await;
    let addr = listener.local_addr();
    let config = protocol(ProtocolVariant::SelectiveRepeat, 4);

    let server = tokio::spawn(async move {
        ReceiverConnection::accept(&listener, &config).await
    });

    let client = tokio::time::timeout(
        Duration::from_secs(5),
        SenderConnection::connect(addr, sender_config(ProtocolVariant::SelectiveRepeat, 4), FaultPlan::none()),
    )
    .await
    .expect("connect timed out")
    .expect("connect failed");

    assert_eq!(client.agreement().window_size, 4);
    assert_eq!(client.agreement().variant, ProtocolVariant::SelectiveRepeat);

    server
        .await
        .expect("server task panicked")
        .expect("server should have accepted matching terms");
}

/// Window mismatch: the responder closes and the initiator fails fatally.
#[tokio::test]
async fn window_mismatch_rejects_both_sides() {
    let listener = bind_loopback().await;
    let addr = listener.local_addr();
    let config = protocol(ProtocolVariant::SelectiveRepeat, 5);

    let server = tokio::spawn(async move {
        ReceiverConnection::accept(&listener, &config).await
    });

    let client = SenderConnection::connect(
        addr,
        sender_config(ProtocolVariant::SelectiveRepeat, 4),
        FaultPlan::none(),
    )
    .await;
    assert!(
        matches!(client, Err(ConnectionError::HandshakeRejected)),
        "initiator must treat refusal as fatal, got: {client:?}",
    );

    let server = server.await.expect("server task panicked");
    assert!(
        matches!(server, Err(ConnectionError::HandshakeMismatch { .. })),
        "responder must refuse a 4-window offer when configured for 5",
    );
}

/// Variant mismatch is refused exactly like a window mismatch.
#[tokio::test]
async fn variant_mismatch_rejects_both_sides() {
    let listener = bind_loopback().await;
    let addr = listener.local_addr();
    let config = protocol(ProtocolVariant::SelectiveRepeat, 4);

    let server = tokio::spawn(async move {
        ReceiverConnection::accept(&listener, &config).await
    });

    let client = SenderConnection::connect(
        addr,
        sender_config(ProtocolVariant::GoBackN, 4),
        FaultPlan::none(),
    )
    .await;
    assert!(matches!(client, Err(ConnectionError::HandshakeRejected)));

    let server = server.await.expect("server task panicked");
    assert!(matches!(server, Err(ConnectionError::HandshakeMismatch { .. })));
}

/// A malformed greeting rejects the connection; no data is ever accepted.
#[tokio::test]
async fn malformed_greeting_is_rejected() {
    let listener = bind_loopback().await;
    let addr = listener.local_addr();
    let config = protocol(ProtocolVariant::SelectiveRepeat, 4);

    let server = tokio::spawn(async move {
        ReceiverConnection::accept(&listener, &config).await
    });

    // Raw peer speaks nonsense instead of a HANDSHAKE record.
    let mut raw = tokio::net::TcpStream::connect(addr).await.expect("connect");
    raw.write_all(b"HELLO|WORLD\nSEND|1|sneaky|532\n")
        .await
        .expect("write");

    let server = server.await.expect("server task panicked");
    assert!(
        server.is_err(),
        "responder must reject a malformed greeting",
    );

    // The responder dropped the connection: the raw peer sees EOF, never an
    // acknowledgment of its smuggled data record.
    let mut reply = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), raw.read_to_end(&mut reply))
        .await
        .expect("read timed out")
        .expect("read failed");
    assert_eq!(n, 0, "no reply expected, got: {:?}", String::from_utf8_lossy(&reply));
}
