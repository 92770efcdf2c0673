//! Transport seam between the connection manager and the physical socket.
//!
//! A [`Connector`] opens a [`Session`]: a write half plus a stream of inbound
//! frames. The stream ending, or yielding an error, means the session is
//! gone. Protocol-level ping/pong and close frames never surface here.

use std::future;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt, stream::BoxStream};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tracing::debug;

use crate::error::{SocketError, SocketResult};

/// A data frame as seen by the connection manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// The text of a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write half of a session.
#[async_trait]
pub trait WsWriter: Send {
    async fn send_ws(&mut self, message: WsMessage) -> SocketResult<()>;

    /// Send a close frame and shut the write half down.
    async fn close(&mut self, code: u16, reason: &str) -> SocketResult<()>;
}

/// One physical transport session.
pub struct Session {
    pub writer: Box<dyn WsWriter>,
    pub reader: BoxStream<'static, SocketResult<WsMessage>>,
}

impl Session {
    pub fn new(
        writer: Box<dyn WsWriter>,
        reader: BoxStream<'static, SocketResult<WsMessage>>,
    ) -> Self {
        Self { writer, reader }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Opens sessions for the connection manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> SocketResult<Session>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Debug, Default)]
pub struct TungsteniteConnector {
    max_message_size: Option<usize>,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the protocol layer reject frames above `size` bytes.
    ///
    /// A rejected frame ends the session, unlike the client-level
    /// `max_message_size`, which drops the frame and keeps the session.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> SocketResult<Session> {
        let mut ws_config = WebSocketConfig::default();
        if let Some(size) = self.max_message_size {
            ws_config.max_message_size = Some(size);
            ws_config.max_frame_size = Some(size);
        }

        let (ws, response) = connect_async_with_config(url, Some(ws_config), false).await?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();
        let reader = stream
            .filter_map(|item| future::ready(inbound_frame(item)))
            .boxed();

        Ok(Session::new(Box::new(TungsteniteWriter { sink }), reader))
    }
}

fn inbound_frame(item: Result<Message, tungstenite::Error>) -> Option<SocketResult<WsMessage>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(WsMessage::Text(text))),
        Ok(Message::Binary(data)) => Some(Ok(WsMessage::Binary(data))),
        Ok(Message::Close(frame)) => {
            let (code, reason) = match frame {
                Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                None => (None, String::new()),
            };
            Some(Err(SocketError::connection_closed(code, reason)))
        }
        // tungstenite answers protocol pings itself.
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(err) => Some(Err(err.into())),
    }
}

struct TungsteniteWriter<S> {
    sink: S,
}

#[async_trait]
impl<S> WsWriter for TungsteniteWriter<S>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send,
{
    async fn send_ws(&mut self, message: WsMessage) -> SocketResult<()> {
        let message = match message {
            WsMessage::Text(text) => Message::Text(text),
            WsMessage::Binary(data) => Message::Binary(data),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> SocketResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frames_become_peer_closed_errors() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "restart".into(),
        };
        match inbound_frame(Ok(Message::Close(Some(frame)))) {
            Some(Err(SocketError::ConnectionClosed { code, reason })) => {
                assert_eq!(code, Some(1001));
                assert_eq!(reason, "restart");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn control_frames_are_filtered() {
        assert!(inbound_frame(Ok(Message::Ping(vec![1]))).is_none());
        assert!(inbound_frame(Ok(Message::Pong(Vec::new()))).is_none());
    }

    #[test]
    fn data_frames_pass_through() {
        match inbound_frame(Ok(Message::Text("hi".to_string()))) {
            Some(Ok(msg)) => assert_eq!(msg, WsMessage::text("hi")),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(WsMessage::binary(vec![1, 2, 3]).len(), 3);
    }

    #[tokio::test]
    async fn writer_maps_frames_onto_the_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        let sink = futures_util::sink::unfold(tx, |tx, message: Message| async move {
            tx.send(message)
                .map_err(|_| tungstenite::Error::ConnectionClosed)?;
            Ok::<_, tungstenite::Error>(tx)
        });
        let mut writer = TungsteniteWriter {
            sink: Box::pin(sink),
        };

        writer.send_ws(WsMessage::text("hello")).await.expect("send");
        writer.close(1000, "bye").await.expect("close");

        assert_eq!(rx.recv().await, Some(Message::Text("hello".to_string())));
        match rx.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
