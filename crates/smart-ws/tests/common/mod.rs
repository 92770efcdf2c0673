#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use smart_ws::{
    BufferConfig, CodecMode, Connector, EventName, EventStream, HeartbeatConfig, ReconnectConfig,
    Session, SocketConfig, SocketError, SocketEvent, SocketResult, WsMessage, WsWriter,
};
use tokio::sync::mpsc;

/// What the next connect attempt does.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Accept,
    /// Open a session whose writes fail immediately.
    AcceptBroken,
    Refuse,
}

/// Something the client wrote to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Written {
    Frame(WsMessage),
    Close { code: u16, reason: String },
}

/// Server side of an in-memory session.
pub struct Peer {
    written: mpsc::UnboundedReceiver<Written>,
    inbound: Option<mpsc::UnboundedSender<SocketResult<WsMessage>>>,
}

impl Peer {
    pub async fn next_written(&mut self) -> Option<Written> {
        tokio::time::timeout(Duration::from_secs(60), self.written.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn next_text(&mut self) -> String {
        match self.next_written().await {
            Some(Written::Frame(WsMessage::Text(text))) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub fn push_text(&self, text: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Ok(WsMessage::text(text)));
        }
    }

    pub fn push_error(&self, err: SocketError) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Err(err));
        }
    }

    /// End the inbound stream as if the peer went away.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }
}

struct MockWriter {
    tx: mpsc::UnboundedSender<Written>,
    broken: bool,
}

#[async_trait]
impl WsWriter for MockWriter {
    async fn send_ws(&mut self, message: WsMessage) -> SocketResult<()> {
        if self.broken {
            return Err(SocketError::transport("broken pipe"));
        }
        self.tx
            .send(Written::Frame(message))
            .map_err(|_| SocketError::transport("peer gone"))
    }

    async fn close(&mut self, code: u16, reason: &str) -> SocketResult<()> {
        self.tx
            .send(Written::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| SocketError::transport("peer gone"))
    }
}

pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    attempts: Arc<AtomicU32>,
    peers: mpsc::UnboundedSender<Peer>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> SocketResult<Session> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);

        if let Outcome::Refuse = outcome {
            return Err(SocketError::transport("connection refused"));
        }

        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader = futures_util::stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        let _ = self.peers.send(Peer {
            written: written_rx,
            inbound: Some(inbound_tx),
        });

        Ok(Session::new(
            Box::new(MockWriter {
                tx: written_tx,
                broken: matches!(outcome, Outcome::AcceptBroken),
            }),
            reader,
        ))
    }
}

/// Test-side controls for a [`MockConnector`].
pub struct MockServer {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    attempts: Arc<AtomicU32>,
    peers: mpsc::UnboundedReceiver<Peer>,
}

impl MockServer {
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn accept(&mut self) -> Peer {
        tokio::time::timeout(Duration::from_secs(60), self.peers.recv())
            .await
            .expect("timed out waiting for a session")
            .expect("connector dropped")
    }
}

pub fn mock() -> (MockConnector, MockServer) {
    let script = Arc::new(Mutex::new(VecDeque::new()));
    let attempts = Arc::new(AtomicU32::new(0));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            script: Arc::clone(&script),
            attempts: Arc::clone(&attempts),
            peers: tx,
        },
        MockServer {
            script,
            attempts,
            peers: rx,
        },
    )
}

/// Raw text payloads, deterministic 100ms backoff, no heartbeat, explicit
/// connect.
pub fn test_config() -> SocketConfig {
    SocketConfig::new("ws://mock.invalid/socket")
        .auto_connect(false)
        .codec(CodecMode::Raw)
        .reconnect(
            ReconnectConfig::default()
                .min_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(5))
                .jitter(0.0),
        )
        .heartbeat(HeartbeatConfig::disabled())
        .buffer(BufferConfig::default())
}

pub type TextEvent = SocketEvent<String, String>;

/// Wait for the next event with the given name, skipping others.
pub async fn expect_event<In, Out>(
    events: &mut EventStream<In, Out>,
    name: EventName,
) -> SocketEvent<In, Out> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
            .expect("event stream closed");
        if event.name() == name {
            return event;
        }
    }
}

/// Collect every event until the stream stays quiet for a while.
pub async fn drain<In, Out>(events: &mut EventStream<In, Out>) -> Vec<SocketEvent<In, Out>> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(30), events.recv()).await
    {
        out.push(event);
    }
    out
}

pub fn names<In, Out>(events: &[SocketEvent<In, Out>]) -> Vec<EventName> {
    events.iter().map(SocketEvent::name).collect()
}
