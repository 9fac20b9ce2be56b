//! `miio-cli` entry point.
//!
//! Parses a device target, a 32-hex-character token, a method name, and a
//! JSON params array, drives a [`Client`] through one handshake-plus-call
//! round trip, and prints the device's reply body as JSON.

#![allow(clippy::print_stdout, reason = "console entry point: this is the program's output")]
#![allow(clippy::print_stderr, reason = "console entry point: error reporting goes to stderr")]

use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use miio_client::{Client, ClientConfig, DEFAULT_PORT};
use miio_client::env::ProdEnv;
use miio_client::transport::{Transport, UdpTransport};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Send one JSON-RPC method call to a Mi Home device over UDP.
#[derive(Parser, Debug)]
#[command(name = "miio-cli")]
#[command(about = "Console client for the Mi Home binary control protocol")]
#[command(version)]
struct Args {
    /// Device IP address.
    #[arg(short, long)]
    address: IpAddr,

    /// Device UDP port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// 32-character hex device token.
    #[arg(short, long)]
    token: String,

    /// JSON-RPC method name, e.g. `get_prop`.
    #[arg(short, long)]
    method: String,

    /// JSON-encoded params array, e.g. `["power"]`.
    #[arg(long, default_value = "[]")]
    params: String,

    /// Per-call reply deadline, in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Maximum attempts (first try plus retries) before giving up.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
}

/// Errors this binary can exit with, beyond what [`miio_client::ClientError`]
/// already covers.
#[derive(Debug, Error)]
enum CliError {
    /// The `--params` argument was not valid JSON.
    #[error("--params is not valid JSON: {0}")]
    InvalidParams(#[source] serde_json::Error),

    /// The client rejected the `--token` argument or the call itself.
    #[error(transparent)]
    Client(#[from] miio_client::ClientError),

    /// Binding the local UDP socket failed.
    #[error("failed to bind local UDP socket: {0}")]
    Io(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "miio_cli=info,miio_client=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let params: serde_json::Value = serde_json::from_str(&args.params).map_err(CliError::InvalidParams)?;

    let transport = UdpTransport::new(default_bind_addr(args.address));
    transport.ensure_ready().await.map_err(CliError::Io)?;

    let config = ClientConfig {
        request_timeout: Duration::from_secs(args.timeout_secs),
        max_attempts: args.max_attempts,
        ..ClientConfig::default()
    };
    let client = Client::with_config(
        ProdEnv,
        transport,
        parse_token(&args.token)?,
        std::net::SocketAddr::new(args.address, args.port),
        config,
    );
    let _unsubscribe = client.start();

    let reply = client.send(&args.method, params).await?;
    let body = serde_json::to_string_pretty(&reply).unwrap_or_else(|_| "{}".to_string());
    println!("{body}");

    client.close().await;
    Ok(())
}

/// Decode a 32-character hex token string, matching the validation
/// [`Client::new`] applies internally (not reusable here since this binary
/// needs the raw bytes before constructing the client with a custom
/// [`ClientConfig`]).
fn parse_token(token_hex: &str) -> Result<[u8; 16], CliError> {
    if token_hex.len() != 32 {
        return Err(CliError::Client(miio_client::ClientError::InvalidToken(format!(
            "expected 32 hex characters, got {}",
            token_hex.len()
        ))));
    }
    let mut token = [0u8; 16];
    for (i, byte) in token.iter_mut().enumerate() {
        let pair = token_hex.get(i * 2..i * 2 + 2).ok_or_else(|| {
            CliError::Client(miio_client::ClientError::InvalidToken(format!("not valid ASCII hex at byte {i}")))
        })?;
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| CliError::Client(miio_client::ClientError::InvalidToken(format!("invalid hex digit at byte {i}"))))?;
    }
    Ok(token)
}

/// Bind the local endpoint on the same address family as the target, on an
/// OS-assigned ephemeral port.
fn default_bind_addr(target: IpAddr) -> std::net::SocketAddr {
    let unspecified = match target {
        IpAddr::V4(_) => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    };
    std::net::SocketAddr::new(unspecified, 0)
}
