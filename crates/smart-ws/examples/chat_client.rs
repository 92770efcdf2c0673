//! Terminal chat client
//!
//! Connects to a chat server, logs every socket event and sends each stdin
//! line as a chat message. Lines typed while disconnected are buffered and
//! delivered on reconnect.
//!
//! Run with: `cargo run -p smart-ws --example chat_client -- ws://localhost:8080`
//!
//! `/quit` disconnects cleanly, `/offline` and `/online` inject connectivity
//! changes.

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smart_ws::{
    BufferConfig, DropStrategy, HeartbeatConfig, ReconnectConfig, SmartSocket, SocketConfig,
    SocketEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize)]
struct InboundMessage {
    user: String,
    text: String,
    #[serde(default)]
    timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
struct OutboundMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    user: String,
    text: String,
}

fn random_name() -> String {
    const ANIMALS: [&str; 6] = ["Lion", "Tiger", "Falcon", "Eagle", "Panther", "Wolf"];
    let mut rng = rand::rng();
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    format!("{animal}#{}", rng.random_range(0..1000))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,smart_ws=debug")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:8080".to_string());
    let user = random_name();

    let config = SocketConfig::new(url)
        .auto_connect(false)
        .reconnect(
            ReconnectConfig::default()
                .min_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(5))
                .jitter(0.2),
        )
        .heartbeat(
            HeartbeatConfig::default()
                .interval(Duration::from_secs(10))
                .timeout(Duration::from_secs(5)),
        )
        .buffer(
            BufferConfig::default()
                .capacity(200)
                .drop_strategy(DropStrategy::Oldest),
        );

    let socket: SmartSocket<InboundMessage, OutboundMessage> = SmartSocket::new(config)?;
    let mut events = socket.events();

    let status = socket.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SocketEvent::Open => info!(retries = status.retries(), "Connected"),
                SocketEvent::Close(close) => {
                    info!(code = close.code, reason = %close.reason, kind = ?close.kind, "Closed");
                }
                SocketEvent::Error(err) => warn!(error = %err, "Socket error"),
                SocketEvent::Reconnect { attempt, delay } => {
                    info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                }
                SocketEvent::Online => info!("Network online"),
                SocketEvent::Offline => info!("Network offline"),
                SocketEvent::Ping { .. } => info!("Ping sent"),
                SocketEvent::Pong { latency } => {
                    info!(latency_ms = latency.as_millis() as u64, "Pong received");
                }
                SocketEvent::BufferAdd { message, evicted } => {
                    info!(text = %message.text, buffered = status.buffered(), "Buffered message");
                    if let Some(evicted) = evicted {
                        warn!(text = %evicted.text, "Buffer full, dropped oldest message");
                    }
                }
                SocketEvent::BufferFlush { count } => info!(count, "Flushed buffered messages"),
                SocketEvent::Message(msg) => {
                    println!("[{}] {}: {}", msg.timestamp.unwrap_or_default(), msg.user, msg.text);
                }
            }
        }
    });

    socket.connect().await?;
    info!(user = %user, "Type a message and press enter");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" => break,
            "/offline" => socket.notify_offline().await?,
            "/online" => socket.notify_online().await?,
            _ => {
                socket
                    .send(OutboundMessage {
                        kind: "chat",
                        user: user.clone(),
                        text: text.to_string(),
                    })
                    .await?;
            }
        }
    }

    socket.disconnect(1000, "user left").await?;
    Ok(())
}
