//! Two emitters exchanging events through an in-process relay
//!
//! Run with: cargo run --example pubsub
//!
//! Spawns a relay, subscribes one emitter to the "ticks" channel and
//! publishes five events from another. The subscriber stops after two
//! quiet seconds, then the relay is stopped through its handle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ipcmux::{
    CancellationToken, IpcConnection, IpcEmitter, RelayConfig, RelayServer, Startable,
    TransportEmitter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ipcmux=info".parse()?),
        )
        .init();

    let config = RelayConfig::with_endpoint("pubsub-demo");
    let server = Arc::new(RelayServer::new(config));
    let handle = server.handle();
    let socket = server.config().socket_path();

    let relay = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start(CancellationToken::new()).await }
    });

    // Give the relay a moment to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    let subscriber = IpcEmitter::new(IpcConnection::connect(&socket).await?, 16);
    let publisher = IpcEmitter::new(IpcConnection::connect(&socket).await?, 16);

    let consumer = tokio::spawn(async move {
        // The first wait registers the subscription
        loop {
            let next = subscriber
                .once("ticks", CancellationToken::new(), Some(Duration::from_secs(2)))
                .await;
            match next {
                Ok(Some(value)) => println!("received: {value}"),
                Ok(None) => break,
                Err(e) => {
                    eprintln!("Subscriber error: {e}");
                    break;
                }
            }
        }
    });

    // Let the registration land before publishing
    tokio::time::sleep(Duration::from_millis(100)).await;
    for n in 1..=5 {
        publisher.emit("ticks", json!({"tick": n})).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    consumer.await?;
    handle.stop().await;
    relay.await??;

    let stats = server.stats().await;
    println!(
        "Relayed {} events, {} deliveries",
        stats.events_relayed, stats.deliveries,
    );

    Ok(())
}
