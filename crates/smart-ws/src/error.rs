//! Error types for the socket client.
//!
//! Only [`SocketError::RetriesExhausted`] is fatal to a client. Every other
//! variant is either returned from a single command or published as an
//! `error` event while the connection carries on.

use std::{string::FromUtf8Error, time::Duration};

use thiserror::Error;

/// The result type used throughout the crate.
pub type SocketResult<T> = Result<T, SocketError>;

/// Everything that can go wrong while driving a socket.
#[derive(Error, Debug)]
pub enum SocketError {
    /// The transport failed to open, write or stay open.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The peer closed the session.
    #[error("Connection closed by peer: code={code:?}, reason={reason}")]
    ConnectionClosed { code: Option<u16>, reason: String },

    /// A heartbeat probe went unanswered.
    #[error("Heartbeat timed out after {timeout:?}")]
    HeartbeatTimeout { timeout: Duration },

    /// Opening a session took longer than the connect timeout.
    #[error("Connect timed out after {duration:?}")]
    ConnectTimeout { duration: Duration },

    /// Encoding or decoding a structured frame failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An outbound payload cannot be represented on the wire.
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// An inbound frame could not be turned into a payload.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// A message was sent while no session was open and buffering is off.
    #[error("Socket is not open and buffering is disabled")]
    NotOpen,

    /// The outbound buffer was full and its policy rejected the message.
    #[error("Outbound buffer full (capacity {capacity}), message rejected")]
    BufferOverflow { capacity: usize },

    /// Reconnection gave up. This is the only fatal condition.
    #[error("Reconnection abandoned after {attempts} failed attempts")]
    RetriesExhausted { attempts: u32 },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The connection manager task is gone.
    #[error("Connection manager shut down")]
    ManagerClosed,
}

impl From<FromUtf8Error> for SocketError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Decode {
            message: e.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SocketError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

impl SocketError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a peer-closed error.
    pub fn connection_closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Whether this error ends the client's lifecycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// Whether this error means the current session is unusable.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionClosed { .. }
                | Self::HeartbeatTimeout { .. }
                | Self::ConnectTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SocketError::config("Invalid URL");
        assert!(matches!(err, SocketError::Config { .. }));

        let err = SocketError::transport("reset by peer");
        assert!(matches!(err, SocketError::Transport { .. }));

        let err = SocketError::connection_closed(Some(1006), "abnormal");
        assert!(matches!(
            err,
            SocketError::ConnectionClosed {
                code: Some(1006),
                ..
            }
        ));
    }

    #[test]
    fn only_retry_exhaustion_is_fatal() {
        assert!(SocketError::RetriesExhausted { attempts: 3 }.is_fatal());
        assert!(!SocketError::NotOpen.is_fatal());
        assert!(
            !SocketError::HeartbeatTimeout {
                timeout: Duration::from_secs(5)
            }
            .is_fatal()
        );
        assert!(!SocketError::BufferOverflow { capacity: 1 }.is_fatal());
    }

    #[test]
    fn session_failures_are_classified() {
        assert!(SocketError::transport("boom").is_session_failure());
        assert!(
            SocketError::HeartbeatTimeout {
                timeout: Duration::from_secs(1)
            }
            .is_session_failure()
        );
        assert!(!SocketError::decode("bad frame").is_session_failure());
        assert!(!SocketError::NotOpen.is_session_failure());
    }

    #[test]
    fn utf8_errors_become_decode_errors() {
        let err: SocketError = String::from_utf8(vec![0xff, 0xfe])
            .map_err(SocketError::from)
            .unwrap_err();
        assert!(matches!(err, SocketError::Decode { .. }));
    }
}
