//! Events published by the connection manager.

use std::{fmt, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::error::SocketError;

/// The closed set of event names handlers can register for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    Open,
    Close,
    Error,
    Reconnect,
    Online,
    Offline,
    Ping,
    Pong,
    BufferAdd,
    BufferFlush,
    Message,
}

impl EventName {
    /// Every event name, in declaration order.
    pub const ALL: [EventName; 11] = [
        Self::Open,
        Self::Close,
        Self::Error,
        Self::Reconnect,
        Self::Online,
        Self::Offline,
        Self::Ping,
        Self::Pong,
        Self::BufferAdd,
        Self::BufferFlush,
        Self::Message,
    ];

    /// Wire-style name, e.g. `bufferAdd`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
            Self::Reconnect => "reconnect",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::BufferAdd => "bufferAdd",
            Self::BufferFlush => "bufferFlush",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a `close` event was published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseKind {
    /// The caller asked for it via `disconnect`.
    Caller,
    /// Reconnection gave up.
    RetriesExhausted,
}

/// Payload of the `close` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub kind: CloseKind,
}

/// An event together with its payload.
///
/// `In` is the inbound payload type, `Out` the outbound one.
#[derive(Clone, Debug)]
pub enum SocketEvent<In, Out> {
    /// A session opened.
    Open,
    /// The client reached `Closed`.
    Close(CloseEvent),
    /// A recoverable error, or retry exhaustion.
    Error(Arc<SocketError>),
    /// A reconnect attempt was scheduled.
    Reconnect { attempt: u32, delay: Duration },
    /// The environment reported connectivity.
    Online,
    /// The environment reported loss of connectivity.
    Offline,
    /// A heartbeat probe was sent.
    Ping { sent_at: Instant },
    /// A heartbeat probe was answered.
    Pong { latency: Duration },
    /// A payload was buffered, possibly evicting the oldest one.
    BufferAdd { message: Out, evicted: Option<Out> },
    /// Buffered payloads were written to a fresh session.
    BufferFlush { count: usize },
    /// A decoded inbound payload.
    Message(In),
}

impl<In, Out> SocketEvent<In, Out> {
    pub fn name(&self) -> EventName {
        match self {
            Self::Open => EventName::Open,
            Self::Close(_) => EventName::Close,
            Self::Error(_) => EventName::Error,
            Self::Reconnect { .. } => EventName::Reconnect,
            Self::Online => EventName::Online,
            Self::Offline => EventName::Offline,
            Self::Ping { .. } => EventName::Ping,
            Self::Pong { .. } => EventName::Pong,
            Self::BufferAdd { .. } => EventName::BufferAdd,
            Self::BufferFlush { .. } => EventName::BufferFlush,
            Self::Message(_) => EventName::Message,
        }
    }

    pub(crate) fn error(err: SocketError) -> Self {
        Self::Error(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_variants() {
        let event: SocketEvent<String, String> = SocketEvent::BufferFlush { count: 3 };
        assert_eq!(event.name(), EventName::BufferFlush);
        assert_eq!(event.name().to_string(), "bufferFlush");

        let event: SocketEvent<String, String> = SocketEvent::Close(CloseEvent {
            code: 1000,
            reason: "bye".to_string(),
            kind: CloseKind::Caller,
        });
        assert_eq!(event.name(), EventName::Close);
    }

    #[test]
    fn all_names_are_distinct() {
        let mut names: Vec<&str> = EventName::ALL.iter().map(EventName::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 11);
    }
}
