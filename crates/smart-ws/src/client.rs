//! Public client handle.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::Stream;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::{
    bus::{EventBus, SubscriptionToken},
    config::SocketConfig,
    error::{SocketError, SocketResult},
    event::{EventName, SocketEvent},
    manager::{Command, ConnectionManager, ConnectionState, SharedStatus},
    transport::{Connector, TungsteniteConnector},
};

/// How far above the client's drop limit the protocol layer's hard limit sits.
pub const PROTOCOL_LIMIT_FACTOR: usize = 4;

/// Handle to a resilient socket.
///
/// Cloning is cheap; every clone talks to the same connection manager task.
/// The task shuts down, closing any open session, once the last handle is
/// dropped.
///
/// ```no_run
/// # async fn demo() -> smart_ws::SocketResult<()> {
/// use smart_ws::{EventName, SmartSocket, SocketConfig, SocketEvent};
///
/// let socket: SmartSocket<serde_json::Value, serde_json::Value> =
///     SmartSocket::new(SocketConfig::new("wss://echo.example.com"))?;
///
/// let _token = socket.on(EventName::Message, |event| {
///     if let SocketEvent::Message(msg) = event {
///         println!("received {msg}");
///     }
/// });
///
/// socket.connect().await?;
/// socket.send(serde_json::json!({"type": "hello"})).await?;
/// # Ok(())
/// # }
/// ```
pub struct SmartSocket<In, Out> {
    cmd_tx: mpsc::Sender<Command<Out>>,
    status: Arc<SharedStatus>,
    bus: EventBus<In, Out>,
    event_capacity: usize,
}

impl<In, Out> Clone for SmartSocket<In, Out> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            status: Arc::clone(&self.status),
            bus: self.bus.clone(),
            event_capacity: self.event_capacity,
        }
    }
}

impl<In, Out> std::fmt::Debug for SmartSocket<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartSocket")
            .field("status", &self.status.state())
            .field("retries", &self.status.retries())
            .finish_non_exhaustive()
    }
}

impl<In, Out> SmartSocket<In, Out>
where
    In: DeserializeOwned + Clone + Send + 'static,
    Out: Serialize + Clone + Send + 'static,
{
    /// Create a WebSocket client. Must be called from within a Tokio runtime.
    ///
    /// Frames above [`SocketConfig::max_message_size`] are dropped by the
    /// client while the session stays up. The protocol layer only rejects
    /// frames over [`PROTOCOL_LIMIT_FACTOR`] times that size, which ends the
    /// session.
    pub fn new(config: SocketConfig) -> SocketResult<Self> {
        let mut connector = TungsteniteConnector::new();
        if config.max_message_size > 0 {
            let limit = config.max_message_size.saturating_mul(PROTOCOL_LIMIT_FACTOR);
            connector = connector.max_message_size(limit);
        }
        Self::with_connector(config, connector)
    }

    /// Create a client over a custom transport.
    pub fn with_connector<C>(config: SocketConfig, connector: C) -> SocketResult<Self>
    where
        C: Connector,
    {
        config.validate().map_err(SocketError::config)?;

        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let status = Arc::new(SharedStatus::default());
        let bus = EventBus::new();

        let manager = ConnectionManager::new(
            Arc::clone(&config),
            Arc::new(connector),
            bus.clone(),
            Arc::clone(&status),
        );
        tokio::spawn(manager.run(cmd_rx));

        Ok(Self {
            cmd_tx,
            status,
            bus,
            event_capacity: config.event_channel_capacity,
        })
    }

    /// Start connecting. Returns once the manager has taken the request;
    /// watch for [`SocketEvent::Open`] to learn when the session is up.
    ///
    /// A no-op while open or while an attempt is in flight. A pending
    /// reconnect delay is skipped.
    pub async fn connect(&self) -> SocketResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { reply }).await?;
        rx.await.map_err(|_| SocketError::ManagerClosed)
    }

    /// Send a payload, buffering it while no session is open.
    ///
    /// Fails with [`SocketError::NotOpen`] when no session is open and
    /// buffering is disabled.
    pub async fn send(&self, payload: Out) -> SocketResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { payload, reply }).await?;
        rx.await.map_err(|_| SocketError::ManagerClosed)?
    }

    /// Close the session and stay closed until the next [`connect`](Self::connect).
    pub async fn disconnect(&self, code: u16, reason: impl Into<String>) -> SocketResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect {
            code,
            reason: reason.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SocketError::ManagerClosed)
    }

    /// Report that the environment regained connectivity.
    pub async fn notify_online(&self) -> SocketResult<()> {
        self.command(Command::Online).await
    }

    /// Report that the environment lost connectivity.
    pub async fn notify_offline(&self) -> SocketResult<()> {
        self.command(Command::Offline).await
    }

    async fn command(&self, cmd: Command<Out>) -> SocketResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SocketError::ManagerClosed)
    }
}

impl<In, Out> SmartSocket<In, Out>
where
    In: Clone + Send + 'static,
    Out: Clone + Send + 'static,
{
    pub fn status(&self) -> ConnectionState {
        self.status.state()
    }

    /// Failed open attempts since the last successful open.
    pub fn retries(&self) -> u32 {
        self.status.retries()
    }

    /// Round-trip time of the most recent answered heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        self.status.latency()
    }

    /// Messages waiting in the outbound buffer.
    pub fn buffered(&self) -> usize {
        self.status.buffered()
    }

    /// Register a handler for one event name.
    ///
    /// Handlers run on the manager task and must not block.
    pub fn on<F>(&self, name: EventName, handler: F) -> SubscriptionToken
    where
        F: Fn(&SocketEvent<In, Out>) + Send + Sync + 'static,
    {
        self.bus.on(name, handler)
    }

    /// Stream of every event, starting now.
    ///
    /// Events are dropped with a warning when the stream falls behind by more
    /// than the configured event channel capacity.
    pub fn events(&self) -> EventStream<In, Out> {
        let (tx, rx) = mpsc::channel(self.event_capacity);
        let tokens = EventName::ALL
            .iter()
            .map(|&name| {
                let tx = tx.clone();
                self.bus.on(name, move |event| {
                    if let Err(err) = tx.try_send(event.clone()) {
                        warn!(event = %name, error = %err, "Dropping event due to backpressure");
                    }
                })
            })
            .collect();
        EventStream { rx, tokens }
    }
}

/// Stream returned by [`SmartSocket::events`]. Dropping it unsubscribes.
pub struct EventStream<In, Out> {
    rx: mpsc::Receiver<SocketEvent<In, Out>>,
    tokens: Vec<SubscriptionToken>,
}

impl<In, Out> EventStream<In, Out> {
    pub async fn recv(&mut self) -> Option<SocketEvent<In, Out>> {
        self.rx.recv().await
    }
}

impl<In, Out> Stream for EventStream<In, Out> {
    type Item = SocketEvent<In, Out>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<In, Out> Drop for EventStream<In, Out> {
    fn drop(&mut self) {
        for token in &self.tokens {
            token.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::marker::PhantomPinned;

    use super::*;

    fn assert_unpin<T: Unpin>() {}

    #[test]
    fn event_stream_is_unpin_for_any_payload() {
        assert_unpin::<EventStream<PhantomPinned, PhantomPinned>>();
    }
}
