//! Wire codec.
//!
//! The codec is the only place that knows how payloads look on the wire.
//! Heartbeat literals are recognised here and handed to the connection
//! manager as [`Frame::Heartbeat`], so the manager never has to inspect
//! payloads to spot them.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    config::{CodecMode, HeartbeatConfig},
    error::{SocketError, SocketResult},
    transport::WsMessage,
};

/// Which heartbeat literal a frame carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Heartbeat {
    /// A liveness probe.
    Probe,
    /// The answer to a probe.
    Response,
}

/// A classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame<T> {
    Heartbeat(Heartbeat),
    Payload(T),
}

/// Encodes `Out` payloads and decodes `In` payloads.
///
/// In [`CodecMode::Structured`] payloads travel as JSON documents. In
/// [`CodecMode::Raw`] a payload that serializes to a JSON string is sent as
/// its bare text, and inbound text is deserialized as a string, so `String`
/// payloads round-trip unchanged.
pub struct Codec<In, Out> {
    mode: CodecMode,
    probe: String,
    response: String,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<In, Out> Codec<In, Out>
where
    In: DeserializeOwned,
    Out: Serialize,
{
    pub fn new(mode: CodecMode, heartbeat: &HeartbeatConfig) -> Self {
        Self {
            mode,
            probe: heartbeat.message.clone(),
            response: heartbeat.response.clone(),
            _marker: PhantomData,
        }
    }

    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    /// Encode an application payload.
    pub fn encode(&self, payload: &Out) -> SocketResult<WsMessage> {
        let text = match self.mode {
            CodecMode::Structured => serde_json::to_string(payload)?,
            CodecMode::Raw => match serde_json::to_value(payload)? {
                Value::String(text) => text,
                other => other.to_string(),
            },
        };

        if self.is_reserved(&text) {
            return Err(SocketError::encode(format!(
                "payload {text:?} collides with a heartbeat literal"
            )));
        }

        Ok(WsMessage::Text(text))
    }

    /// The literal frame for a heartbeat.
    pub fn encode_heartbeat(&self, kind: Heartbeat) -> WsMessage {
        match kind {
            Heartbeat::Probe => WsMessage::text(self.probe.as_str()),
            Heartbeat::Response => WsMessage::text(self.response.as_str()),
        }
    }

    /// Classify and decode an inbound frame.
    pub fn decode(&self, message: &WsMessage) -> SocketResult<Frame<In>> {
        match message {
            WsMessage::Text(text) => self.decode_text(text),
            WsMessage::Binary(data) => {
                let text = String::from_utf8(data.clone())?;
                self.decode_text(&text)
            }
        }
    }

    pub fn decode_text(&self, text: &str) -> SocketResult<Frame<In>> {
        // The response literal wins when both literals are the same.
        if text == self.response {
            return Ok(Frame::Heartbeat(Heartbeat::Response));
        }
        if text == self.probe {
            return Ok(Frame::Heartbeat(Heartbeat::Probe));
        }

        let payload = match self.mode {
            CodecMode::Structured => serde_json::from_str(text)?,
            CodecMode::Raw => serde_json::from_value(Value::String(text.to_owned()))?,
        };
        Ok(Frame::Payload(payload))
    }

    fn is_reserved(&self, text: &str) -> bool {
        text == self.probe || text == self.response
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chat {
        #[serde(rename = "type")]
        kind: String,
        user: String,
        text: String,
    }

    fn chat(text: &str) -> Chat {
        Chat {
            kind: "chat".to_string(),
            user: "Falcon#42".to_string(),
            text: text.to_string(),
        }
    }

    fn structured() -> Codec<Chat, Chat> {
        Codec::new(CodecMode::Structured, &HeartbeatConfig::default())
    }

    fn raw() -> Codec<String, String> {
        Codec::new(CodecMode::Raw, &HeartbeatConfig::default())
    }

    #[test]
    fn structured_encode_produces_json() {
        let frame = structured().encode(&chat("hi")).expect("encode");
        let text = frame.as_text().expect("text frame");
        let value: Value = serde_json::from_str(text).expect("json");
        assert_eq!(value["type"], "chat");
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn structured_decode_parses_payload() {
        let frame = structured()
            .decode_text(r#"{"type":"chat","user":"Wolf#1","text":"yo"}"#)
            .expect("decode");
        match frame {
            Frame::Payload(msg) => {
                assert_eq!(msg.user, "Wolf#1");
                assert_eq!(msg.text, "yo");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_a_recoverable_error() {
        let err = structured().decode_text("{not json").unwrap_err();
        assert!(matches!(err, SocketError::Serialization(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn heartbeat_literals_bypass_structured_decoding() {
        let codec = structured();
        assert_eq!(
            codec.decode_text("pong").expect("pong"),
            Frame::Heartbeat(Heartbeat::Response)
        );
        assert_eq!(
            codec.decode_text("ping").expect("ping"),
            Frame::Heartbeat(Heartbeat::Probe)
        );
        assert_eq!(codec.encode_heartbeat(Heartbeat::Probe).as_text(), Some("ping"));
    }

    #[test]
    fn shared_literal_is_treated_as_response() {
        let codec: Codec<String, String> = Codec::new(
            CodecMode::Raw,
            &HeartbeatConfig::default().message("hb").response("hb"),
        );
        assert_eq!(
            codec.decode_text("hb").expect("hb"),
            Frame::Heartbeat(Heartbeat::Response)
        );
    }

    #[test]
    fn raw_mode_sends_bare_text() {
        let codec = raw();
        let frame = codec.encode(&"hello there".to_string()).expect("encode");
        assert_eq!(frame.as_text(), Some("hello there"));
        assert_eq!(
            codec.decode_text("hello there").expect("decode"),
            Frame::Payload("hello there".to_string())
        );
    }

    #[test]
    fn raw_mode_refuses_heartbeat_collisions() {
        let err = raw().encode(&"ping".to_string()).unwrap_err();
        assert!(matches!(err, SocketError::Encode { .. }));
    }

    #[test]
    fn binary_frames_are_decoded_as_utf8() {
        let codec = raw();
        let frame = codec
            .decode(&WsMessage::binary(b"bytes".to_vec()))
            .expect("decode");
        assert_eq!(frame, Frame::Payload("bytes".to_string()));

        let err = codec.decode(&WsMessage::binary(vec![0xff])).unwrap_err();
        assert!(matches!(err, SocketError::Decode { .. }));
    }
}
