//! The connection manager actor.
//!
//! One task owns the session, the timers and the outbound buffer. Caller
//! commands, connect attempts, the reconnect timer, inbound frames and the
//! heartbeat are all handled one at a time from a single biased
//! `tokio::select!` loop, with commands polled first.

use std::{
    future,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::{StreamExt, future::BoxFuture};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    buffer::{Enqueued, OutboundBuffer},
    bus::EventBus,
    codec::{Codec, Frame, Heartbeat},
    config::SocketConfig,
    error::{SocketError, SocketResult},
    event::{CloseEvent, CloseKind, SocketEvent},
    heartbeat::{HeartbeatDue, HeartbeatMonitor, HeartbeatSample},
    reconnect::ReconnectScheduler,
    transport::{Connector, Session, WsMessage},
};

/// Close code reported when reconnection gives up.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code sent when every client handle has been dropped.
const GOING_AWAY: u16 = 1001;

/// Lifecycle state of a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Constructed, never connected.
    Idle,
    /// A caller-initiated open is in progress.
    Connecting,
    /// A session is open.
    Open,
    /// A caller-initiated shutdown is in progress.
    Closing,
    /// Shut down. Only an explicit `connect` leaves this state.
    Closed,
    /// Waiting for, or making, a reconnect attempt.
    Reconnecting,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Open => 2,
            Self::Closing => 3,
            Self::Closed => 4,
            Self::Reconnecting => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Closed,
            5 => Self::Reconnecting,
            _ => Self::Idle,
        }
    }
}

const NO_LATENCY: u64 = u64::MAX;

/// Status cells written by the manager and read by handles without blocking.
#[derive(Debug)]
pub(crate) struct SharedStatus {
    state: AtomicU8,
    retries: AtomicU32,
    latency_nanos: AtomicU64,
    buffered: AtomicUsize,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Idle.as_u8()),
            retries: AtomicU32::new(0),
            latency_nanos: AtomicU64::new(NO_LATENCY),
            buffered: AtomicUsize::new(0),
        }
    }
}

impl SharedStatus {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        match self.latency_nanos.load(Ordering::Acquire) {
            NO_LATENCY => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn set_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(NO_LATENCY - 1);
        self.latency_nanos.store(nanos, Ordering::Release);
    }
}

/// Requests sent from handles to the manager.
pub(crate) enum Command<Out> {
    Connect {
        reply: oneshot::Sender<()>,
    },
    Send {
        payload: Out,
        reply: oneshot::Sender<SocketResult<()>>,
    },
    Disconnect {
        code: u16,
        reason: String,
        reply: oneshot::Sender<()>,
    },
    Online,
    Offline,
}

type ConnectAttempt = BoxFuture<'static, SocketResult<Session>>;

pub(crate) struct ConnectionManager<In, Out> {
    config: Arc<SocketConfig>,
    connector: Arc<dyn Connector>,
    codec: Codec<In, Out>,
    bus: EventBus<In, Out>,
    status: Arc<SharedStatus>,
    state: ConnectionState,
    retries: u32,
    session: Option<Session>,
    connecting: Option<ConnectAttempt>,
    scheduler: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    buffer: Option<OutboundBuffer<Out>>,
}

impl<In, Out> ConnectionManager<In, Out>
where
    In: DeserializeOwned + Clone + Send + 'static,
    Out: Serialize + Clone + Send + 'static,
{
    pub(crate) fn new(
        config: Arc<SocketConfig>,
        connector: Arc<dyn Connector>,
        bus: EventBus<In, Out>,
        status: Arc<SharedStatus>,
    ) -> Self {
        let buffer = config
            .buffer
            .enabled
            .then(|| OutboundBuffer::new(&config.buffer));
        Self {
            codec: Codec::new(config.codec, &config.heartbeat),
            scheduler: ReconnectScheduler::new(config.reconnect.backoff()),
            heartbeat: HeartbeatMonitor::new(&config.heartbeat),
            config,
            connector,
            bus,
            status,
            state: ConnectionState::Idle,
            retries: 0,
            session: None,
            connecting: None,
            buffer,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command<Out>>) {
        info!(url = %self.config.url, "Connection manager started");

        if self.config.auto_connect {
            self.connect();
        }

        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                result = attempt_finished(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_attempt_finished(result).await;
                }
                () = self.scheduler.fired() => self.on_retry_due(),
                frame = next_frame(&mut self.session) => self.on_frame(frame).await,
                due = self.heartbeat.due() => match due {
                    HeartbeatDue::Expired(sample) => self.on_heartbeat_timeout(sample),
                    HeartbeatDue::Probe => self.on_heartbeat_tick().await,
                },
            }
        }

        self.teardown(GOING_AWAY, "client dropped").await;
        info!(url = %self.config.url, "Connection manager stopped");
    }

    async fn handle_command(&mut self, cmd: Command<Out>) {
        match cmd {
            Command::Connect { reply } => {
                self.connect();
                let _ = reply.send(());
            }
            Command::Send { payload, reply } => {
                let result = self.send(payload).await;
                let _ = reply.send(result);
            }
            Command::Disconnect {
                code,
                reason,
                reply,
            } => {
                self.disconnect(code, reason).await;
                let _ = reply.send(());
            }
            Command::Online => {
                debug!("Environment reported online");
                self.bus.emit(&SocketEvent::Online);
            }
            Command::Offline => {
                debug!("Environment reported offline");
                self.bus.emit(&SocketEvent::Offline);
            }
        }
    }

    fn connect(&mut self) {
        if self.state.is_open() || self.connecting.is_some() {
            debug!(state = ?self.state, "Connect ignored");
            return;
        }
        if self.scheduler.cancel() {
            debug!("Pending reconnect cancelled by connect");
        }
        // A fresh lifecycle gets the whole retry budget.
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Closed) {
            self.set_retries(0);
        }
        self.set_state(ConnectionState::Connecting);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let limit = self.config.connect_timeout;

        debug!(url = %url, attempt = self.retries + 1, "Opening session");
        self.connecting = Some(Box::pin(async move {
            match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(SocketError::ConnectTimeout { duration: limit }),
            }
        }));
    }

    async fn on_attempt_finished(&mut self, result: SocketResult<Session>) {
        match result {
            Ok(session) => {
                self.session = Some(session);
                self.set_retries(0);
                self.set_state(ConnectionState::Open);
                info!(url = %self.config.url, "Session open");
                self.bus.emit(&SocketEvent::Open);

                self.heartbeat.start();
                self.flush().await;
            }
            Err(err) => {
                warn!(url = %self.config.url, error = %err, "Connect attempt failed");
                self.bus.emit(&SocketEvent::error(err));
                self.set_retries(self.retries.saturating_add(1));
                self.retry_or_give_up();
            }
        }
    }

    fn on_retry_due(&mut self) {
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        self.start_attempt();
    }

    /// Tear the session down after a transport-side failure.
    fn on_session_lost(&mut self, err: SocketError) {
        if self.session.take().is_none() {
            return;
        }
        self.heartbeat.stop();
        warn!(url = %self.config.url, error = %err, "Session lost");
        self.bus.emit(&SocketEvent::error(err));
        self.retry_or_give_up();
    }

    fn retry_or_give_up(&mut self) {
        if let Some(max) = self.config.reconnect.max_retries
            && self.retries >= max
        {
            self.give_up();
            return;
        }

        let attempt = self.retries.saturating_add(1);
        let delay = self.scheduler.schedule(self.retries);
        self.set_state(ConnectionState::Reconnecting);
        debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
        self.bus.emit(&SocketEvent::Reconnect { attempt, delay });
    }

    fn give_up(&mut self) {
        self.scheduler.cancel();
        self.heartbeat.stop();
        self.connecting = None;
        self.session = None;
        self.set_state(ConnectionState::Closed);

        error!(
            url = %self.config.url,
            attempts = self.retries,
            "Reconnection abandoned"
        );
        self.bus.emit(&SocketEvent::error(SocketError::RetriesExhausted {
            attempts: self.retries,
        }));
        self.bus.emit(&SocketEvent::Close(CloseEvent {
            code: ABNORMAL_CLOSURE,
            reason: "reconnection attempts exhausted".to_string(),
            kind: CloseKind::RetriesExhausted,
        }));
    }

    async fn disconnect(&mut self, code: u16, reason: String) {
        if self.state.is_closed() {
            debug!("Disconnect ignored, already closed");
            return;
        }

        self.set_state(ConnectionState::Closing);
        self.teardown(code, &reason).await;
        self.set_state(ConnectionState::Closed);
        info!(code, reason = %reason, "Disconnected");
        self.bus.emit(&SocketEvent::Close(CloseEvent {
            code,
            reason,
            kind: CloseKind::Caller,
        }));
    }

    /// Cancel timers, abandon any attempt and close the session if one is open.
    async fn teardown(&mut self, code: u16, reason: &str) {
        if self.scheduler.cancel() {
            debug!("Pending reconnect cancelled");
        }
        if self.connecting.take().is_some() {
            debug!("In-progress connect attempt abandoned");
        }
        self.heartbeat.stop();

        if let Some(mut session) = self.session.take() {
            match timeout(self.config.connect_timeout, session.writer.close(code, reason)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "Close frame not delivered"),
                Err(_) => debug!("Timed out sending close frame"),
            }
        }
    }

    async fn send(&mut self, payload: Out) -> SocketResult<()> {
        if self.state.is_open() && self.session.is_some() {
            let frame = match self.codec.encode(&payload) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "Failed to encode outbound payload");
                    return Err(err);
                }
            };

            let Err(err) = self.write(frame).await else {
                return Ok(());
            };

            // The session is gone; keep the payload for the next one.
            let result = if self.buffer.is_some() {
                self.enqueue(payload);
                Ok(())
            } else {
                Err(SocketError::transport(err.to_string()))
            };
            self.on_session_lost(err);
            return result;
        }

        if self.buffer.is_some() {
            self.enqueue(payload);
            return Ok(());
        }

        debug!(state = ?self.state, "Send dropped, socket not open");
        self.bus.emit(&SocketEvent::error(SocketError::NotOpen));
        Err(SocketError::NotOpen)
    }

    fn enqueue(&mut self, payload: Out) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        let message = payload.clone();
        let event = match buffer.enqueue(payload) {
            Enqueued::Queued => SocketEvent::BufferAdd {
                message,
                evicted: None,
            },
            Enqueued::Evicted(old) => {
                debug!(capacity = buffer.capacity(), "Buffer full, evicted oldest message");
                SocketEvent::BufferAdd {
                    message,
                    evicted: Some(old.payload),
                }
            }
            Enqueued::Rejected(_) => {
                warn!(capacity = buffer.capacity(), "Buffer full, message rejected");
                SocketEvent::error(SocketError::BufferOverflow {
                    capacity: buffer.capacity(),
                })
            }
        };

        self.sync_buffered();
        self.bus.emit(&event);
    }

    /// Write buffered messages oldest-first. A message leaves the buffer only
    /// after it has been written.
    async fn flush(&mut self) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        if buffer.is_empty() {
            return;
        }

        let mut sent = 0;
        let mut failure = None;
        loop {
            let encoded = match buffer.front() {
                Some(front) => self.codec.encode(&front.payload),
                None => break,
            };
            let frame = match encoded {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "Dropping buffered message that cannot be encoded");
                    buffer.pop_front();
                    self.bus.emit(&SocketEvent::error(err));
                    continue;
                }
            };

            let Some(session) = self.session.as_mut() else {
                break;
            };
            match session.writer.send_ws(frame).await {
                Ok(()) => {
                    buffer.pop_front();
                    sent += 1;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        self.sync_buffered();
        match failure {
            Some(err) => {
                warn!(sent, "Session lost during buffer flush");
                self.on_session_lost(err);
            }
            None => {
                debug!(count = sent, "Buffer flushed");
                self.bus.emit(&SocketEvent::BufferFlush { count: sent });
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<SocketResult<WsMessage>>) {
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                self.on_session_lost(err);
                return;
            }
            None => {
                self.on_session_lost(SocketError::connection_closed(None, "stream ended"));
                return;
            }
        };

        let max = self.config.max_message_size;
        if max > 0 && message.len() > max {
            warn!(size = message.len(), max, "Dropping oversized frame");
            return;
        }

        match self.codec.decode(&message) {
            Ok(Frame::Payload(payload)) => {
                self.bus.emit(&SocketEvent::Message(payload));
            }
            Ok(Frame::Heartbeat(Heartbeat::Response)) => {
                match self.heartbeat.complete(Instant::now()) {
                    Some(HeartbeatSample {
                        rtt: Some(latency), ..
                    }) => {
                        self.status.set_latency(latency);
                        debug!(latency_ms = latency.as_secs_f64() * 1000.0, "Heartbeat answered");
                        self.bus.emit(&SocketEvent::Pong { latency });
                    }
                    _ => debug!("Ignoring heartbeat response with no probe in flight"),
                }
            }
            Ok(Frame::Heartbeat(Heartbeat::Probe)) => {
                let response = self.codec.encode_heartbeat(Heartbeat::Response);
                if let Err(err) = self.write(response).await {
                    self.on_session_lost(err);
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to decode inbound frame");
                self.bus.emit(&SocketEvent::error(err));
            }
        }
    }

    async fn on_heartbeat_tick(&mut self) {
        if !self.state.is_open() {
            return;
        }
        let Some(sample) = self.heartbeat.begin_probe(Instant::now()) else {
            return;
        };

        self.bus.emit(&SocketEvent::Ping {
            sent_at: sample.sent_at,
        });
        let probe = self.codec.encode_heartbeat(Heartbeat::Probe);
        if let Err(err) = self.write(probe).await {
            self.on_session_lost(err);
        }
    }

    fn on_heartbeat_timeout(&mut self, sample: HeartbeatSample) {
        let timeout = self.heartbeat.timeout();
        warn!(
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            waited_ms = u64::try_from(sample.sent_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Heartbeat unanswered"
        );
        self.on_session_lost(SocketError::HeartbeatTimeout { timeout });
    }

    async fn write(&mut self, frame: WsMessage) -> SocketResult<()> {
        match self.session.as_mut() {
            Some(session) => session.writer.send_ws(frame).await,
            None => Err(SocketError::NotOpen),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "State transition");
        }
        self.state = state;
        self.status.state.store(state.as_u8(), Ordering::Release);
    }

    fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
        self.status.retries.store(retries, Ordering::Release);
    }

    fn sync_buffered(&self) {
        let len = self.buffer.as_ref().map_or(0, OutboundBuffer::len);
        self.status.buffered.store(len, Ordering::Release);
    }
}

async fn attempt_finished(attempt: &mut Option<ConnectAttempt>) -> SocketResult<Session> {
    match attempt.as_mut() {
        Some(fut) => fut.await,
        None => future::pending().await,
    }
}

async fn next_frame(session: &mut Option<Session>) -> Option<SocketResult<WsMessage>> {
    match session.as_mut() {
        Some(session) => session.reader.next().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_status_cell() {
        let status = SharedStatus::default();
        assert_eq!(status.state(), ConnectionState::Idle);
        assert_eq!(status.latency(), None);

        for state in [
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
            ConnectionState::Reconnecting,
        ] {
            status.state.store(state.as_u8(), Ordering::Release);
            assert_eq!(status.state(), state);
        }
    }

    #[test]
    fn latency_is_stored_exactly() {
        let status = SharedStatus::default();
        status.set_latency(Duration::from_millis(125));
        assert_eq!(status.latency(), Some(Duration::from_millis(125)));
    }
}
