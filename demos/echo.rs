//! Connects to a WebSocket echo server, sends a few frames and prints what comes back,
//! reconnecting automatically if the connection drops.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,resilient_ws=debug cargo run --example echo --features tracing -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use resilient_ws::ws::config::{Config, ReconnectConfig};
use resilient_ws::ws::{ConnectionManager, Lifecycle};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_URI: &str = "wss://echo.websocket.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_URI.to_owned());
    let config = Config::builder()
        .server_uri(uri.parse()?)
        .connect_timeout(Duration::from_secs(10))
        .auto_reconnect(true)
        .reconnect(ReconnectConfig::default())
        .build();
    let connection = ConnectionManager::tungstenite(config)?;

    let mut lifecycle = connection.lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            match event {
                Lifecycle::Reconnecting { attempt, delay } => {
                    warn!(attempt, ?delay, "Connection lost, retrying");
                }
                Lifecycle::ReconnectExhausted => warn!("Giving up on the connection"),
                other => info!(event = ?other),
            }
        }
    });

    let mut messages = Box::pin(connection.on_message());
    connection.connect().await?;
    info!(uri = %uri, state = %connection.state(), "Connected");

    for n in 1..=3 {
        connection.send(format!("hello #{n}")).await?;
    }

    while let Ok(Some(message)) = timeout(Duration::from_secs(5), messages.next()).await {
        match message {
            Ok(text) => info!(%text, "Received"),
            Err(e) => warn!(error = %e, "Subscription error"),
        }
    }

    let clean = connection.close().await?;
    info!(clean, "Closed");

    Ok(())
}
