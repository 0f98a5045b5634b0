//! Scripted in-memory media engine plus helpers shared by the integration
//! tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webcast_common::{IceCandidate, ServerMessage};
use webcast_gateway::media::{
    EndpointId, IceCandidateStream, MediaEngine, MediaError, PipelineId,
};
use webcast_gateway::{Channel, ConnectionId, Peers};

/// Offer text that the fake engine refuses to negotiate.
pub const BAD_OFFER: &str = "v=0 unsupported";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreatePipeline,
    CreateEndpoint,
    Subscribe,
    Connect,
    ProcessOffer,
    Gather,
}

#[derive(Default)]
struct Recorder {
    next_id: u32,
    pipelines: HashSet<PipelineId>,
    endpoints: HashSet<EndpointId>,
    edges: Vec<(EndpointId, EndpointId)>,
    releases: HashMap<String, u32>,
    gathering: HashSet<EndpointId>,
    sinks: HashMap<EndpointId, mpsc::UnboundedSender<IceCandidate>>,
    received: Vec<(EndpointId, IceCandidate)>,
    failures: HashSet<Step>,
    pipelines_created: u32,
}

#[derive(Default)]
pub struct FakeEngine {
    inner: Mutex<Recorder>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next call of `step` fail.
    pub fn fail_once(&self, step: Step) {
        self.inner.lock().unwrap().failures.insert(step);
    }

    /// Pretend the engine discovered `candidate` on `endpoint`.
    pub fn discover(&self, endpoint: &EndpointId, candidate: IceCandidate) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.sinks.get(endpoint) {
            Some(sink) => sink.send(candidate).is_ok(),
            None => false,
        }
    }

    pub fn live_pipelines(&self) -> usize {
        self.inner.lock().unwrap().pipelines.len()
    }

    pub fn pipelines_created(&self) -> u32 {
        self.inner.lock().unwrap().pipelines_created
    }

    pub fn live_endpoints(&self) -> HashSet<EndpointId> {
        self.inner.lock().unwrap().endpoints.clone()
    }

    pub fn edges(&self) -> Vec<(EndpointId, EndpointId)> {
        self.inner.lock().unwrap().edges.clone()
    }

    pub fn release_count(&self, id: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .releases
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_gathering(&self, endpoint: &EndpointId) -> bool {
        self.inner.lock().unwrap().gathering.contains(endpoint)
    }

    pub fn received_candidates(&self) -> Vec<(EndpointId, IceCandidate)> {
        self.inner.lock().unwrap().received.clone()
    }

    fn check(&self, step: Step) -> Result<(), MediaError> {
        if self.inner.lock().unwrap().failures.remove(&step) {
            return Err(MediaError::Rpc {
                code: 40000,
                message: format!("injected {step:?} failure"),
            });
        }
        Ok(())
    }

    fn require_endpoint(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        if self.inner.lock().unwrap().endpoints.contains(endpoint) {
            Ok(())
        } else {
            Err(MediaError::Rpc {
                code: 40101,
                message: format!("Object '{endpoint}' not found"),
            })
        }
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError> {
        self.check(Step::CreatePipeline)?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        inner.pipelines_created += 1;
        let id = PipelineId(format!("pipeline-{}", inner.next_id));
        inner.pipelines.insert(id.clone());
        Ok(id)
    }

    async fn create_endpoint(&self, pipeline: &PipelineId) -> Result<EndpointId, MediaError> {
        self.check(Step::CreateEndpoint)?;
        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.pipelines.contains(pipeline),
            "endpoint requested on dead pipeline {pipeline}"
        );
        inner.next_id += 1;
        let id = EndpointId(format!("endpoint-{}", inner.next_id));
        inner.endpoints.insert(id.clone());
        Ok(id)
    }

    async fn process_offer(
        &self,
        endpoint: &EndpointId,
        offer: &str,
    ) -> Result<String, MediaError> {
        self.check(Step::ProcessOffer)?;
        self.require_endpoint(endpoint)?;
        if offer == BAD_OFFER {
            return Err(MediaError::Rpc {
                code: 40208,
                message: "SDP offer could not be processed".into(),
            });
        }
        Ok(format!("answer-from-{endpoint}"))
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        self.check(Step::Gather)?;
        self.require_endpoint(endpoint)?;
        self.inner.lock().unwrap().gathering.insert(endpoint.clone());
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        self.require_endpoint(endpoint)?;
        self.inner
            .lock()
            .unwrap()
            .received
            .push((endpoint.clone(), candidate));
        Ok(())
    }

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), MediaError> {
        self.check(Step::Connect)?;
        self.require_endpoint(source)?;
        self.require_endpoint(sink)?;
        self.inner
            .lock()
            .unwrap()
            .edges
            .push((source.clone(), sink.clone()));
        Ok(())
    }

    async fn subscribe_ice_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<IceCandidateStream, MediaError> {
        self.check(Step::Subscribe)?;
        self.require_endpoint(endpoint)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().sinks.insert(endpoint.clone(), tx);
        Ok(rx)
    }

    async fn release_endpoint(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.releases.entry(endpoint.0.clone()).or_default() += 1;
        inner.endpoints.remove(endpoint);
        inner.sinks.remove(endpoint);
        inner.gathering.remove(endpoint);
        inner.edges.retain(|(a, b)| a != endpoint && b != endpoint);
        Ok(())
    }

    async fn release_pipeline(&self, pipeline: &PipelineId) -> Result<(), MediaError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.releases.entry(pipeline.0.clone()).or_default() += 1;
        inner.pipelines.remove(pipeline);
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub peers: Peers,
    pub channel: Arc<Channel>,
}

impl Harness {
    pub fn new() -> Self {
        let engine = FakeEngine::new();
        let peers = Peers::new();
        let channel = Arc::new(Channel::new(engine.clone(), peers.clone()));
        Self {
            engine,
            peers,
            channel,
        }
    }

    /// Register a client connection and return its outbox.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = ConnectionId::new();
        let rx = self.peers.register(id).await;
        (id, rx)
    }
}

pub fn candidate(tag: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{tag} 1 UDP 2122252543 192.0.2.1 50000 typ host"),
        sdp_mid: "0".into(),
        sdp_m_line_index: 0,
    }
}

/// Next queued message, failing the test if nothing arrives soon.
pub async fn next_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a server message")
        .expect("outbox closed")
}

/// Assert that nothing is queued right now.
pub fn assert_quiet(rx: &mut mpsc::Receiver<ServerMessage>) {
    if let Ok(msg) = rx.try_recv() {
        panic!("unexpected message {msg:?}");
    }
}
