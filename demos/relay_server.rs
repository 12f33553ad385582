//! Standalone relay example
//!
//! Run with: cargo run --example relay_server [ENDPOINT]
//!
//! Examples:
//!   cargo run --example relay_server              # listens on <tmp>/relay.sock
//!   cargo run --example relay_server myapp        # listens on <tmp>/myapp.sock
//!
//! Clients connect to the printed socket path and exchange length-prefixed
//! JSON frames: `register` to subscribe to a channel, `event` to publish,
//! `disconnect` to unsubscribe. Press Ctrl+C to stop.

use std::sync::Arc;

use ipcmux::{RelayConfig, RelayServer};

fn print_usage() {
    eprintln!("Usage: relay_server [ENDPOINT]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  ENDPOINT    Socket name, resolved under the temp dir (default: relay)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ipcmux=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let endpoint = args.get(1).map(String::as_str).unwrap_or("relay");
    let config = RelayConfig::with_endpoint(endpoint);
    let server = Arc::new(RelayServer::new(config));

    println!("Relay listening on {}", server.config().socket_path().display());
    println!();
    println!("=== Connect a client ===");
    println!(
        "let conn = IpcConnection::connect({:?}).await?;",
        server.config().socket_path()
    );
    println!("let emitter = IpcEmitter::new(conn, 16);");
    println!();

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    if let Err(e) = &result {
        eprintln!("Relay error: {}", e);
    }

    let stats = server.stats().await;
    println!(
        "Served {} connections, relayed {} events ({} deliveries, {} dropped)",
        stats.total_connections, stats.events_relayed, stats.deliveries, stats.dropped_deliveries,
    );

    result.map_err(Into::into)
}
