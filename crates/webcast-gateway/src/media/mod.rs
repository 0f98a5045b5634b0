//! Media engine capability surface.
//!
//! The gateway never touches media itself. Pipelines and WebRTC endpoints
//! live in an external engine (Kurento in production) and are referred to by
//! opaque handles. ICE candidates discovered by the engine arrive
//! asynchronously on an [`IceCandidateStream`], one per endpoint.

pub mod kurento;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use webcast_common::IceCandidate;

pub use kurento::{KurentoClient, KurentoOptions};

/// Candidates discovered by the engine for one endpoint. Closed when the
/// endpoint is released or the engine connection drops.
pub type IceCandidateStream = mpsc::UnboundedReceiver<IceCandidate>;

/// Handle to a media pipeline inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineId(pub String);

/// Handle to a WebRTC endpoint inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(pub String);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kurento's code for "object not found".
pub const OBJECT_NOT_FOUND: i64 = 40101;

#[derive(Debug, Error)]
pub enum MediaError {
    /// The engine answered with an error object.
    #[error("media engine error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("media engine transport error: {0}")]
    Transport(String),

    #[error("media engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("media engine connection closed")]
    Closed,

    /// The engine answered with something we could not interpret.
    #[error("media engine protocol error: {0}")]
    Protocol(String),
}

impl MediaError {
    /// True when the engine reports that the object does not exist, which
    /// release paths treat as already released.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MediaError::Rpc { code, .. } if *code == OBJECT_NOT_FOUND)
    }
}

/// Operations the signaling core needs from a media engine.
///
/// Release methods must be idempotent: releasing an unknown or already
/// released handle succeeds.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError>;

    async fn create_endpoint(&self, pipeline: &PipelineId) -> Result<EndpointId, MediaError>;

    /// Negotiate `offer` on `endpoint`, returning the SDP answer.
    async fn process_offer(&self, endpoint: &EndpointId, offer: &str)
        -> Result<String, MediaError>;

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), MediaError>;

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError>;

    /// Route media from `source` into `sink`.
    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), MediaError>;

    /// Subscribe to candidates discovered on `endpoint`.
    async fn subscribe_ice_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<IceCandidateStream, MediaError>;

    async fn release_endpoint(&self, endpoint: &EndpointId) -> Result<(), MediaError>;

    async fn release_pipeline(&self, pipeline: &PipelineId) -> Result<(), MediaError>;
}
