//! Signaling error taxonomy.
//!
//! The `Display` text of a [`SignalError`] is what the client receives in the
//! `message` field of an `error` envelope.

use std::fmt;

use thiserror::Error;

/// Result type alias using the signaling error type.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Channel operation that talked to the media engine when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Publish,
    Play,
    IceCandidate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Publish => f.write_str("Publish"),
            Operation::Play => f.write_str("Play"),
            Operation::IceCandidate => f.write_str("ICE candidate"),
        }
    }
}

/// Every way a signaling request can be rejected or fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Frame is not a JSON object with a string `id`, or a field is missing.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// `id` names a message kind this server does not know.
    #[error("Unknown id: {0}")]
    UnknownMessageKind(String),

    /// `play` arrived while nobody is publishing.
    #[error("No publisher")]
    NoPublisher,

    /// The publishing connection asked to play its own stream.
    #[error("Connection is already publishing")]
    RoleConflict,

    /// The media engine rejected or failed to process an SDP offer.
    #[error("{op} failed: {reason}")]
    NegotiationFailure { op: Operation, reason: String },

    /// Any other media engine failure (endpoint creation, connect, ICE).
    #[error("{op} failed: {reason}")]
    MediaEngineFailure { op: Operation, reason: String },

    /// The peer's outbox is gone or full. Only ever logged.
    #[error("send failed: {0}")]
    SendFailure(String),
}

impl SignalError {
    pub fn malformed(msg: impl fmt::Display) -> Self {
        Self::MalformedMessage(msg.to_string())
    }

    pub fn negotiation(op: Operation, reason: impl fmt::Display) -> Self {
        Self::NegotiationFailure {
            op,
            reason: reason.to_string(),
        }
    }

    pub fn media(op: Operation, reason: impl fmt::Display) -> Self {
        Self::MediaEngineFailure {
            op,
            reason: reason.to_string(),
        }
    }

    pub fn send(msg: impl fmt::Display) -> Self {
        Self::SendFailure(msg.to_string())
    }
}
