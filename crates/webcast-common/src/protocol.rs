//! JSON control protocol spoken over `/ws`.
//!
//! Every frame is a JSON object discriminated by its `id` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SignalError;

/// Message kinds a client may send.
const CLIENT_KINDS: [&str; 5] = ["publish", "play", "onIceCandidate", "stop", "ping"];

/// ICE candidate as exchanged with browsers (`RTCIceCandidateInit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
}

/// Client -> server control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    #[serde(rename = "play")]
    Play {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    #[serde(rename = "onIceCandidate")]
    OnIceCandidate { candidate: IceCandidate },
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Decode one text frame.
    ///
    /// Unknown `id` values are reported separately from frames that are not
    /// valid envelopes at all.
    pub fn decode(text: &str) -> Result<Self, SignalError> {
        let value: Value = serde_json::from_str(text).map_err(SignalError::malformed)?;
        let Some(object) = value.as_object() else {
            return Err(SignalError::malformed("expected a JSON object"));
        };
        let kind = match object.get("id") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(SignalError::malformed("`id` must be a string")),
            None => return Err(SignalError::malformed("missing `id`")),
        };
        if !CLIENT_KINDS.contains(&kind.as_str()) {
            return Err(SignalError::UnknownMessageKind(kind.clone()));
        }
        serde_json::from_value(value).map_err(SignalError::malformed)
    }

    /// Wire name of this message kind, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Publish { .. } => "publish",
            ClientMessage::Play { .. } => "play",
            ClientMessage::OnIceCandidate { .. } => "onIceCandidate",
            ClientMessage::Stop => "stop",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Server -> client control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ServerMessage {
    #[serde(rename = "publishResponse")]
    PublishResponse {
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },
    #[serde(rename = "playResponse")]
    PlayResponse {
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },
    #[serde(rename = "iceCandidate")]
    IceCandidate { candidate: IceCandidate },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl std::fmt::Display) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }

    /// Serialize to the text frame sent to the client.
    pub fn encode(&self) -> String {
        // Every variant is plain strings and integers, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"id":"error"}"#))
    }
}
