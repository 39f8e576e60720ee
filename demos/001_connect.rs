//! Connect to a gateway over WebSocket.
//!
//! Demonstrates:
//! - Building a connection config for the local gateway
//! - Handshake and status transitions
//! - Health request
//! - Logging every pushed event
//!
//! Usage:
//!   GATEWAY_TOKEN=<token> cargo run --example 001_connect
//!   cargo run --example 001_connect -- --token <token> --url ws://127.0.0.1:18789
//!   cargo run --example 001_connect -- --no-wait
//!   cargo run --example 001_connect -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use gateway_client::{ConnectionConfig, GatewayClient, Result, Token};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 001: Connect ===\n");

    // ========================================================================
    // Build Config
    // ========================================================================

    println!("[1] Building config...");

    let mut config = match &args.url {
        Some(url) => ConnectionConfig::new(url)?,
        None => ConnectionConfig::local()?,
    };
    match args.token {
        Some(token) => {
            config = config.with_token(Token::new(token)?);
            println!("    ✓ Token set");
        }
        None => println!("    - No token (set {} or pass --token)", common::TOKEN_ENV),
    }
    println!("    URL: {}\n", config.url);

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[2] Connecting...");

    let client = GatewayClient::websocket();
    let mut statuses = client.status_events();
    tokio::spawn(async move {
        while let Ok(event) = statuses.recv().await {
            println!("    [status] {} -> {}", event.previous, event.status);
        }
    });

    client.connect(config).await?;
    println!("    ✓ Connected");
    if let Some(interval) = client.heartbeat().tick_interval {
        println!("    Tick interval: {interval:?}\n");
    }

    // ========================================================================
    // Health
    // ========================================================================

    println!("[3] Requesting health...");
    let health = client.health().await?;
    println!("    ✓ {health}\n");

    // ========================================================================
    // Events
    // ========================================================================

    println!("[4] Logging events...");
    client.on("*", |event| println!("    [event] {} {}", event.event, event.payload));
    println!("    ✓ Subscribed to *\n");

    common::wait_for_exit(args.no_wait).await;

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("\n[Cleanup] Disconnecting...");
    client.disconnect().await;
    println!("          ✓ {}", client.status());

    Ok(())
}
