//! Socket client configuration.
//!
//! A [`SocketConfig`] is fixed for the lifetime of a client. Every option has
//! a default and the heartbeat and buffer components can be switched off
//! independently.

use std::time::Duration;

use crate::reconnect::BackoffConfig;

/// What the outbound buffer does with a message that arrives when it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DropStrategy {
    /// Evict the oldest buffered message to make room.
    #[default]
    Oldest,
    /// Reject the incoming message and keep the buffer as is.
    Newest,
}

/// How payloads are put on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecMode {
    /// Payloads are sent as bare text.
    Raw,
    /// Payloads are JSON documents.
    #[default]
    Structured,
}

/// Reconnection backoff settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Base delay for the first reconnection attempt.
    pub min_delay: Duration,
    /// Upper bound for the unjittered delay.
    pub max_delay: Duration,
    /// Jitter fraction (0.0-1.0) applied symmetrically around the delay.
    pub jitter: f64,
    /// Maximum failed attempts before giving up (None = infinite).
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Set the base delay.
    #[must_use]
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the retry limit.
    #[must_use]
    pub fn max_retries(mut self, retries: Option<u32>) -> Self {
        self.max_retries = retries;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

/// Application-level heartbeat settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Whether heartbeats run at all.
    pub enabled: bool,
    /// Interval between probes.
    pub interval: Duration,
    /// Maximum time to wait for a probe response.
    pub timeout: Duration,
    /// Literal text frame sent as the probe.
    pub message: String,
    /// Literal text frame expected as the response.
    pub response: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            message: "ping".to_string(),
            response: "pong".to_string(),
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeats switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the probe interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the probe literal.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the response literal.
    #[must_use]
    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }
}

/// Outbound buffer settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// Whether messages sent while disconnected are kept.
    pub enabled: bool,
    /// Maximum number of buffered messages.
    pub capacity: usize,
    /// Overflow policy.
    pub drop_strategy: DropStrategy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            drop_strategy: DropStrategy::Oldest,
        }
    }
}

impl BufferConfig {
    /// Buffering switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the overflow policy.
    #[must_use]
    pub fn drop_strategy(mut self, strategy: DropStrategy) -> Self {
        self.drop_strategy = strategy;
        self
    }
}

/// Configuration for a socket client.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Target address, e.g. `ws://localhost:8080`.
    pub url: String,
    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Outbound buffer settings.
    pub buffer: BufferConfig,
    /// Wire format of payloads.
    pub codec: CodecMode,
    /// Timeout for opening a session.
    pub connect_timeout: Duration,
    /// Inbound frames larger than this are dropped (0 = unlimited).
    pub max_message_size: usize,
    /// Capacity of the command channel to the connection manager.
    pub command_channel_capacity: usize,
    /// Capacity of each [`EventStream`](crate::EventStream).
    pub event_channel_capacity: usize,
    /// Issue `connect()` as soon as the client is built. On by default; turn
    /// it off to register handlers before the first `open`.
    pub auto_connect: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            buffer: BufferConfig::default(),
            codec: CodecMode::Structured,
            connect_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            command_channel_capacity: 64,
            event_channel_capacity: 256,
            auto_connect: true,
        }
    }
}

impl SocketConfig {
    /// Create a configuration for the given address.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Replace the reconnection settings.
    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replace the heartbeat settings.
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Replace the buffer settings.
    #[must_use]
    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the codec mode.
    #[must_use]
    pub fn codec(mut self, mode: CodecMode) -> Self {
        self.codec = mode;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Set the event stream capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Set whether the client connects on construction.
    #[must_use]
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        self.reconnect.backoff().validate()?;
        if self.heartbeat.enabled {
            if self.heartbeat.interval.is_zero() {
                return Err("Heartbeat interval must be > 0".to_string());
            }
            if self.heartbeat.timeout.is_zero() {
                return Err("Heartbeat timeout must be > 0".to_string());
            }
            if self.heartbeat.message.is_empty() || self.heartbeat.response.is_empty() {
                return Err("Heartbeat literals cannot be empty".to_string());
            }
        }
        if self.buffer.enabled && self.buffer.capacity == 0 {
            return Err("Buffer capacity must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}
