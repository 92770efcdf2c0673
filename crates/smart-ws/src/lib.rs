//! # smart-ws
//!
//! A resilient, long-lived WebSocket client.
//!
//! A [`SmartSocket`] keeps one logical connection alive over an unreliable
//! transport:
//!
//! - **Reconnection** with exponential, bounded and jittered backoff, and an
//!   optional retry limit
//! - **Heartbeats** that detect silent failures and measure round-trip latency
//! - **Outbound buffering** while disconnected, bounded with a configurable
//!   eviction policy and flushed in order on reconnect
//! - **Typed events** delivered to registered handlers or as a `Stream`
//!
//! All state lives in a single connection manager task; handles are cheap to
//! clone and never block on status reads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use futures_util::StreamExt;
//! use smart_ws::{HeartbeatConfig, ReconnectConfig, SmartSocket, SocketConfig, SocketEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SocketConfig::new("wss://chat.example.com/ws")
//!         .auto_connect(false)
//!         .reconnect(ReconnectConfig::default().max_retries(Some(10)))
//!         .heartbeat(HeartbeatConfig::default().interval(Duration::from_secs(15)));
//!
//!     let socket: SmartSocket<serde_json::Value, serde_json::Value> = SmartSocket::new(config)?;
//!     let mut events = socket.events();
//!     socket.connect().await?;
//!
//!     while let Some(event) = events.next().await {
//!         if let SocketEvent::Message(msg) = event {
//!             println!("{msg}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod buffer;
mod bus;
mod client;
mod codec;
mod config;
mod error;
mod event;
mod heartbeat;
mod manager;
mod reconnect;
mod transport;

pub use buffer::BufferedMessage;
pub use bus::{EventBus, SubscriptionToken};
pub use client::{EventStream, PROTOCOL_LIMIT_FACTOR, SmartSocket};
pub use codec::{Codec, Frame, Heartbeat};
pub use config::{
    BufferConfig, CodecMode, DropStrategy, HeartbeatConfig, ReconnectConfig, SocketConfig,
};
pub use error::{SocketError, SocketResult};
pub use event::{CloseEvent, CloseKind, EventName, SocketEvent};
pub use heartbeat::HeartbeatSample;
pub use manager::ConnectionState;
pub use transport::{Connector, Session, TungsteniteConnector, WsMessage, WsWriter};
