//! Entry point for `sliding-window`.
//!
//! Parses CLI arguments and dispatches into either **server** (receiver)
//! or **client** (sender) mode.  All protocol work is delegated to library
//! modules; this file owns only process setup, the message corpus, and
//! result printing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sliding_window::config::{
    ChecksumWidth, CongestionConfig, NakPolicy, ProtocolConfig, ProtocolVariant, SenderConfig,
};
use sliding_window::connection::{ReceiverConnection, SenderConnection};
use sliding_window::fault::FaultPlan;
use sliding_window::transport::Listener;
use sliding_window::wire;

/// Reliable, ordered message delivery over a corruptible byte stream.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive messages: accept connections and deliver payloads in order.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:65432")]
        bind: String,
        /// Protocol variant to insist on (SR or GBN).
        #[arg(long, default_value = "SR")]
        variant: String,
        /// Window size to insist on.
        #[arg(short, long, default_value_t = 4)]
        window: usize,
        /// Use the 8-bit (modulo-256) checksum convention.
        #[arg(long)]
        eight_bit_checksum: bool,
        /// NAK out-of-window packets with the expected sequence instead of
        /// the offending one.
        #[arg(long)]
        nak_expected: bool,
        /// Serve a single connection, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Send a corpus of messages reliably to a server.
    Client {
        /// Remote server address.
        #[arg(short, long, default_value = "127.0.0.1:65432")]
        server: String,
        /// Protocol variant to offer (SR or GBN).
        #[arg(long, default_value = "SR")]
        variant: String,
        /// Window size to offer.
        #[arg(short, long, default_value_t = 4)]
        window: usize,
        /// File of messages, one per line.
        #[arg(short, long)]
        corpus: PathBuf,
        /// Send at most this many messages from the corpus.
        #[arg(long)]
        count: Option<usize>,
        /// Sequence numbers whose first transmission is corrupted, e.g. "2,5".
        #[arg(long)]
        corrupt: Option<String>,
        /// Per-packet retransmission timeout in milliseconds.
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,
        /// Retransmissions allowed per packet before it is aborted.
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Enable congestion control (slow start / congestion avoidance).
        #[arg(long)]
        congestion: bool,
        /// Initial slow-start threshold when congestion control is on.
        #[arg(long, default_value_t = 16)]
        ssthresh: u32,
        /// Use the 8-bit (modulo-256) checksum convention.
        #[arg(long)]
        eight_bit_checksum: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Server { bind, variant, window, eight_bit_checksum, nak_expected, once } => {
            let config = ProtocolConfig {
                variant: parse_variant(&variant)?,
                window_size: window,
                checksum_width: width(eight_bit_checksum),
                nak_policy: if nak_expected {
                    NakPolicy::ExpectedSequence
                } else {
                    NakPolicy::OffendingSequence
                },
            };
            run_server(parse_addr(&bind)?, config, once).await
        }
        Mode::Client {
            server,
            variant,
            window,
            corpus,
            count,
            corrupt,
            timeout_ms,
            max_retries,
            congestion,
            ssthresh,
            eight_bit_checksum,
        } => {
            let config = SenderConfig {
                protocol: ProtocolConfig {
                    variant: parse_variant(&variant)?,
                    window_size: window,
                    checksum_width: width(eight_bit_checksum),
                    nak_policy: NakPolicy::default(),
                },
                retransmit_timeout: Duration::from_millis(timeout_ms),
                max_retries,
                congestion: congestion.then(|| CongestionConfig { initial_ssthresh: ssthresh }),
                ..SenderConfig::default()
            };
            let faults = match corrupt {
                Some(list) => FaultPlan::corrupt_once(parse_corrupt_list(&list)?),
                None => FaultPlan::none(),
            };
            let mut messages = load_corpus(&corpus)?;
            if let Some(count) = count {
                messages.truncate(count);
            }
            run_client(parse_addr(&server)?, config, faults, messages).await
        }
    }
}

async fn run_server(bind: SocketAddr, config: ProtocolConfig, once: bool) -> Result<()> {
    let listener = Listener::bind(bind).await?;
    println!("listening on {} ({})", listener.local_addr(), config.agreement());
    loop {
        // One connection at a time; each owns its window state exclusively.
        match ReceiverConnection::accept(&listener, &config).await {
            Ok(conn) => match conn.serve().await {
                Ok(report) => {
                    println!("connection finished, {} message(s):", report.delivered.len());
                    for (sequence, payload) in &report.delivered {
                        println!("  {sequence:>4}  {payload}");
                    }
                }
                Err(e) => log::error!("connection failed: {e}"),
            },
            Err(e) => log::error!("rejected connection: {e}"),
        }
        if once {
            return Ok(());
        }
    }
}

async fn run_client(
    server: SocketAddr,
    config: SenderConfig,
    faults: FaultPlan,
    messages: Vec<String>,
) -> Result<()> {
    let total = messages.len();
    let conn = SenderConnection::connect(server, config, faults)
        .await
        .context("connection setup failed")?;
    println!("negotiated {}", conn.agreement());

    let report = conn.transfer(messages).await.context("transfer failed")?;
    println!(
        "transfer complete: {}/{} acknowledged: {:?}",
        report.acknowledged.len(),
        total,
        report.acknowledged
    );
    Ok(())
}

fn parse_variant(s: &str) -> Result<ProtocolVariant> {
    s.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn parse_addr(s: &str) -> Result<SocketAddr> {
    s.parse().with_context(|| format!("invalid address: {s}"))
}

fn width(eight_bit: bool) -> ChecksumWidth {
    if eight_bit {
        ChecksumWidth::Eight
    } else {
        ChecksumWidth::Sixteen
    }
}

/// Load one message per non-empty line.  Lines that would break the record
/// framing are skipped with a warning rather than sent mangled.
fn load_corpus(path: &PathBuf) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read corpus {}", path.display()))?;
    let mut messages = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if wire::validate_payload(line).is_err() {
            log::warn!("skipping corpus line with reserved delimiter: {line}");
            continue;
        }
        messages.push(line.to_string());
    }
    anyhow::ensure!(!messages.is_empty(), "corpus {} holds no usable messages", path.display());
    Ok(messages)
}

fn parse_corrupt_list(list: &str) -> Result<Vec<u64>> {
    list.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .with_context(|| format!("invalid sequence in corrupt list: {part}"))
        })
        .collect()
}
