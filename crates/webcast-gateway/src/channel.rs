//! Single-publisher / multi-viewer channel.
//!
//! ```text
//!   EMPTY ──publish──► LIVE ──stop/close (publisher)──► EMPTY
//!                      │  ▲
//!                      └──┘ publish (replace), play, stop (viewer), ICE
//! ```
//!
//! Every transition runs under one channel-wide lock, held across the media
//! engine calls it makes. Outbound messages are only queued (never awaited),
//! so a slow peer cannot stall the channel. State is committed only after
//! the engine calls it depends on have succeeded; a failed transition
//! releases whatever it created.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use webcast_common::{IceCandidate, Operation, ServerMessage, SignalError};

use crate::media::{EndpointId, IceCandidateStream, MediaEngine, PipelineId};
use crate::peers::{ConnectionId, Peers};

#[derive(Debug, Clone)]
struct Publisher {
    connection: ConnectionId,
    endpoint: EndpointId,
}

#[derive(Debug, Default)]
struct ChannelState {
    pipeline: Option<PipelineId>,
    publisher: Option<Publisher>,
    viewers: HashMap<ConnectionId, EndpointId>,
}

/// Point-in-time copy of the channel registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSnapshot {
    pub pipeline: Option<PipelineId>,
    pub publisher: Option<(ConnectionId, EndpointId)>,
    pub viewers: BTreeMap<ConnectionId, EndpointId>,
}

impl ChannelSnapshot {
    /// A channel is live while it has a publisher.
    pub fn is_live(&self) -> bool {
        self.publisher.is_some()
    }

    pub fn publisher_connection(&self) -> Option<ConnectionId> {
        self.publisher.as_ref().map(|(connection, _)| *connection)
    }
}

pub struct Channel {
    engine: Arc<dyn MediaEngine>,
    peers: Peers,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub fn new(engine: Arc<dyn MediaEngine>, peers: Peers) -> Self {
        Self {
            engine,
            peers,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Make `connection` the publisher, retiring any previous one.
    ///
    /// On success the client has been sent `publishResponse`, the engine is
    /// gathering candidates for the new endpoint and existing viewers are fed
    /// from it.
    pub async fn publish(
        &self,
        connection: ConnectionId,
        sdp_offer: &str,
    ) -> Result<(), SignalError> {
        const OP: Operation = Operation::Publish;
        let mut state = self.state.lock().await;

        // A connection owns at most one endpoint.
        if let Some(endpoint) = state.viewers.remove(&connection) {
            debug!(%connection, "viewer switching to publisher");
            self.release_endpoint(&endpoint).await;
        }

        let pipeline = match state.pipeline.clone() {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = self
                    .engine
                    .create_pipeline()
                    .await
                    .map_err(|e| SignalError::media(OP, e))?;
                info!(%pipeline, "media pipeline created");
                state.pipeline = Some(pipeline.clone());
                pipeline
            }
        };

        if let Some(previous) = state.publisher.take() {
            info!(
                previous = %previous.connection,
                %connection,
                "replacing publisher"
            );
            self.release_endpoint(&previous.endpoint).await;
        }

        let endpoint = match self.open_endpoint(&pipeline, connection, OP).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                self.release_pipeline_if_idle(&mut state).await;
                return Err(err);
            }
        };

        let sdp_answer = match self.engine.process_offer(&endpoint, sdp_offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.release_endpoint(&endpoint).await;
                self.release_pipeline_if_idle(&mut state).await;
                return Err(SignalError::negotiation(OP, e));
            }
        };

        state.publisher = Some(Publisher {
            connection,
            endpoint: endpoint.clone(),
        });
        self.peers
            .deliver(connection, ServerMessage::PublishResponse { sdp_answer })
            .await;

        if let Err(e) = self.engine.gather_candidates(&endpoint).await {
            state.publisher = None;
            self.release_endpoint(&endpoint).await;
            self.release_pipeline_if_idle(&mut state).await;
            return Err(SignalError::media(OP, e));
        }

        self.reconnect_viewers(&mut state, &endpoint).await;

        info!(
            %connection,
            %endpoint,
            viewers = state.viewers.len(),
            "publisher registered"
        );
        Ok(())
    }

    /// Attach `connection` as a viewer of the current publisher.
    ///
    /// A connection that is already viewing gets a fresh endpoint; the old
    /// one is released once the new one has negotiated.
    pub async fn play(
        &self,
        connection: ConnectionId,
        sdp_offer: &str,
    ) -> Result<(), SignalError> {
        const OP: Operation = Operation::Play;
        let mut state = self.state.lock().await;

        let (Some(publisher), Some(pipeline)) = (&state.publisher, &state.pipeline) else {
            return Err(SignalError::NoPublisher);
        };
        if publisher.connection == connection {
            return Err(SignalError::RoleConflict);
        }
        let source = publisher.endpoint.clone();
        let pipeline = pipeline.clone();

        let endpoint = self.open_endpoint(&pipeline, connection, OP).await?;

        if let Err(e) = self.engine.connect(&source, &endpoint).await {
            self.release_endpoint(&endpoint).await;
            return Err(SignalError::media(OP, e));
        }

        let sdp_answer = match self.engine.process_offer(&endpoint, sdp_offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.release_endpoint(&endpoint).await;
                return Err(SignalError::negotiation(OP, e));
            }
        };

        if let Some(previous) = state.viewers.insert(connection, endpoint.clone()) {
            debug!(%connection, endpoint = %previous, "replacing viewer endpoint");
            self.release_endpoint(&previous).await;
        }
        self.peers
            .deliver(connection, ServerMessage::PlayResponse { sdp_answer })
            .await;

        if let Err(e) = self.engine.gather_candidates(&endpoint).await {
            state.viewers.remove(&connection);
            self.release_endpoint(&endpoint).await;
            return Err(SignalError::media(OP, e));
        }

        info!(
            %connection,
            %endpoint,
            viewers = state.viewers.len(),
            "viewer registered"
        );
        Ok(())
    }

    /// Hand a client candidate to whichever endpoint `connection` owns.
    /// Candidates from connections without an endpoint are dropped.
    pub async fn add_ice_candidate(
        &self,
        connection: ConnectionId,
        candidate: IceCandidate,
    ) -> Result<(), SignalError> {
        let state = self.state.lock().await;

        let endpoint = match &state.publisher {
            Some(publisher) if publisher.connection == connection => Some(&publisher.endpoint),
            _ => state.viewers.get(&connection),
        };
        let Some(endpoint) = endpoint else {
            trace!(%connection, "candidate from connection without endpoint ignored");
            return Ok(());
        };

        self.engine
            .add_ice_candidate(endpoint, candidate)
            .await
            .map_err(|e| SignalError::media(Operation::IceCandidate, e))
    }

    /// Publisher: tear down the whole channel. Viewer: release its endpoint.
    /// Anyone else: nothing to do.
    pub async fn stop(&self, connection: ConnectionId) {
        let mut state = self.state.lock().await;

        let is_publisher = state
            .publisher
            .as_ref()
            .is_some_and(|publisher| publisher.connection == connection);
        if is_publisher {
            self.teardown(&mut state).await;
            info!(%connection, "publisher stopped, channel torn down");
            return;
        }

        if let Some(endpoint) = state.viewers.remove(&connection) {
            self.release_endpoint(&endpoint).await;
            self.release_pipeline_if_idle(&mut state).await;
            info!(
                %connection,
                viewers = state.viewers.len(),
                "viewer stopped"
            );
            return;
        }

        trace!(%connection, "stop from connection without endpoint");
    }

    pub async fn snapshot(&self) -> ChannelSnapshot {
        let state = self.state.lock().await;
        ChannelSnapshot {
            pipeline: state.pipeline.clone(),
            publisher: state
                .publisher
                .as_ref()
                .map(|p| (p.connection, p.endpoint.clone())),
            viewers: state
                .viewers
                .iter()
                .map(|(connection, endpoint)| (*connection, endpoint.clone()))
                .collect(),
        }
    }

    /// Create an endpoint whose discovered candidates flow to `connection`.
    async fn open_endpoint(
        &self,
        pipeline: &PipelineId,
        connection: ConnectionId,
        op: Operation,
    ) -> Result<EndpointId, SignalError> {
        let endpoint = self
            .engine
            .create_endpoint(pipeline)
            .await
            .map_err(|e| SignalError::media(op, e))?;

        match self.engine.subscribe_ice_candidates(&endpoint).await {
            Ok(candidates) => {
                tokio::spawn(forward_candidates(
                    candidates,
                    self.peers.clone(),
                    connection,
                    endpoint.clone(),
                ));
                Ok(endpoint)
            }
            Err(e) => {
                self.release_endpoint(&endpoint).await;
                Err(SignalError::media(op, e))
            }
        }
    }

    /// Feed every registered viewer from a replacement publisher endpoint.
    /// Viewers the engine refuses to connect are dropped and told so.
    async fn reconnect_viewers(&self, state: &mut ChannelState, source: &EndpointId) {
        let viewers: Vec<(ConnectionId, EndpointId)> = state
            .viewers
            .iter()
            .map(|(connection, endpoint)| (*connection, endpoint.clone()))
            .collect();

        for (connection, endpoint) in viewers {
            match self.engine.connect(source, &endpoint).await {
                Ok(()) => debug!(%connection, %endpoint, "viewer moved to new publisher"),
                Err(e) => {
                    warn!(
                        %connection,
                        %endpoint,
                        "failed to reconnect viewer to new publisher: {}", e
                    );
                    state.viewers.remove(&connection);
                    self.release_endpoint(&endpoint).await;
                    self.peers
                        .deliver(
                            connection,
                            ServerMessage::error(SignalError::media(Operation::Play, e)),
                        )
                        .await;
                }
            }
        }
    }

    async fn teardown(&self, state: &mut ChannelState) {
        for (connection, endpoint) in state.viewers.drain() {
            trace!(%connection, %endpoint, "releasing viewer on teardown");
            if let Err(e) = self.engine.release_endpoint(&endpoint).await {
                warn!(%connection, %endpoint, "failed to release viewer endpoint: {}", e);
            }
        }
        if let Some(publisher) = state.publisher.take() {
            self.release_endpoint(&publisher.endpoint).await;
        }
        if let Some(pipeline) = state.pipeline.take() {
            self.release_pipeline(&pipeline).await;
        }
    }

    /// Drop the pipeline once nothing uses it any more.
    async fn release_pipeline_if_idle(&self, state: &mut ChannelState) {
        if state.publisher.is_some() || !state.viewers.is_empty() {
            return;
        }
        if let Some(pipeline) = state.pipeline.take() {
            self.release_pipeline(&pipeline).await;
        }
    }

    async fn release_endpoint(&self, endpoint: &EndpointId) {
        if let Err(e) = self.engine.release_endpoint(endpoint).await {
            warn!(%endpoint, "failed to release endpoint: {}", e);
        }
    }

    async fn release_pipeline(&self, pipeline: &PipelineId) {
        match self.engine.release_pipeline(pipeline).await {
            Ok(()) => info!(%pipeline, "media pipeline released"),
            Err(e) => warn!(%pipeline, "failed to release pipeline: {}", e),
        }
    }
}

async fn forward_candidates(
    mut candidates: IceCandidateStream,
    peers: Peers,
    connection: ConnectionId,
    endpoint: EndpointId,
) {
    while let Some(candidate) = candidates.recv().await {
        trace!(%connection, %endpoint, "relaying engine candidate");
        peers
            .deliver(connection, ServerMessage::IceCandidate { candidate })
            .await;
    }
    debug!(%connection, %endpoint, "candidate stream closed");
}
