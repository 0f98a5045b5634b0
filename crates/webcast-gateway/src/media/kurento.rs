//! Kurento Media Server client (JSON-RPC 2.0 over WebSocket).
//!
//! One socket is shared by every channel operation. A writer task drains the
//! outbound queue, a reader task resolves pending requests by id and routes
//! `IceCandidateFound` events to the endpoint's candidate sink. Both tasks
//! only hold weak references, so dropping the client closes the socket.
//!
//! A lost socket is final and is reported through [`KurentoClient::closed`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use webcast_common::IceCandidate;

use super::{EndpointId, IceCandidateStream, MediaEngine, MediaError, PipelineId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = Result<Value, MediaError>;

const OUTBOX_CAPACITY: usize = 64;
const ICE_CANDIDATE_FOUND: &str = "IceCandidateFound";

#[derive(Debug, Clone)]
pub struct KurentoOptions {
    /// Upper bound for a single request round trip.
    pub request_timeout: Duration,
    /// Interval between `ping` keepalives.
    pub keepalive_interval: Duration,
}

impl Default for KurentoOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(240),
        }
    }
}

struct Inner {
    outbound: mpsc::Sender<Message>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    ice_sinks: Mutex<HashMap<EndpointId, mpsc::UnboundedSender<IceCandidate>>>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    options: KurentoOptions,
    lost: watch::Sender<bool>,
}

/// Media engine backed by a Kurento Media Server.
pub struct KurentoClient {
    inner: Arc<Inner>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Any frame the server may send: a response or an `onEvent` notification.
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

impl KurentoClient {
    /// Connect to `url` (e.g. `ws://localhost:8888/kurento`).
    pub async fn connect(url: &str, options: KurentoOptions) -> Result<Self, MediaError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| MediaError::Transport(format!("failed to connect to {url}: {e}")))?;
        info!("connected to media engine at {}", url);

        let (write, read) = ws_stream.split();
        let (outbound, rx) = mpsc::channel(OUTBOX_CAPACITY);

        let inner = Arc::new(Inner {
            outbound,
            pending: Mutex::new(HashMap::new()),
            ice_sinks: Mutex::new(HashMap::new()),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            options,
            lost: watch::channel(false).0,
        });

        tokio::spawn(writer_task(write, rx));
        tokio::spawn(reader_task(read, Arc::downgrade(&inner)));
        tokio::spawn(keepalive_task(Arc::downgrade(&inner)));

        Ok(Self { inner })
    }

    /// Resolves once the engine connection is gone for good.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut lost = self.inner.lost.subscribe();
        async move {
            // An error means the client itself was dropped.
            let _ = lost.wait_for(|lost| *lost).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.lost.borrow()
    }

    async fn invoke(&self, object: &str, operation: &str, params: Value) -> Reply {
        self.inner
            .request(
                "invoke",
                json!({
                    "object": object,
                    "operation": operation,
                    "operationParams": params,
                }),
            )
            .await
    }

    async fn create(&self, kind: &str, constructor_params: Value) -> Result<String, MediaError> {
        let result = self
            .inner
            .request(
                "create",
                json!({
                    "type": kind,
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await?;
        string_value(&result)
    }

    async fn release(&self, object: &str) -> Result<(), MediaError> {
        match self.inner.request("release", json!({ "object": object })).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(object, "release of unknown media object ignored");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl Inner {
    async fn request(&self, method: &str, mut params: Value) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(session_id) = self.session_id.lock().await.clone() {
            if let Value::Object(map) = &mut params {
                map.insert("sessionId".into(), Value::String(session_id));
            }
        }
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if *self.lost.borrow() {
                return Err(MediaError::Closed);
            }
            pending.insert(id, tx);
        }

        trace!(id, method, "media engine request");
        if self
            .outbound
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(MediaError::Closed);
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(MediaError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(MediaError::Timeout(self.options.request_timeout))
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let incoming: Incoming = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("unparsable frame from media engine: {}", e);
                return;
            }
        };

        if incoming.method.as_deref() == Some("onEvent") {
            match incoming.params.as_ref().and_then(parse_ice_event) {
                Some((endpoint, candidate)) => self.route_candidate(endpoint, candidate).await,
                None => trace!("ignoring media engine event"),
            }
            return;
        }

        let Some(id) = incoming.id else {
            debug!(method = ?incoming.method, "ignoring media engine notification");
            return;
        };

        let reply = match (incoming.result, incoming.error) {
            (_, Some(error)) => Err(MediaError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => {
                if let Some(session_id) = result.get("sessionId").and_then(Value::as_str) {
                    let mut current = self.session_id.lock().await;
                    if current.as_deref() != Some(session_id) {
                        debug!(session_id, "media engine session assigned");
                        *current = Some(session_id.to_string());
                    }
                }
                Ok(result)
            }
            (None, None) => Err(MediaError::Protocol(format!(
                "response {id} has neither result nor error"
            ))),
        };

        match self.pending.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => trace!(id, "response for abandoned request"),
        }
    }

    async fn route_candidate(&self, endpoint: EndpointId, candidate: IceCandidate) {
        let mut sinks = self.ice_sinks.lock().await;
        let Some(sink) = sinks.get(&endpoint) else {
            trace!(%endpoint, "candidate for endpoint without subscriber");
            return;
        };
        if sink.send(candidate).is_err() {
            sinks.remove(&endpoint);
        }
    }

    async fn fail_all(&self) {
        self.lost.send_replace(true);
        for (_, waiter) in self.pending.lock().await.drain() {
            let _ = waiter.send(Err(MediaError::Closed));
        }
        self.ice_sinks.lock().await.clear();
    }
}

/// Extract `(endpoint, candidate)` from an `onEvent` params object.
fn parse_ice_event(params: &Value) -> Option<(EndpointId, IceCandidate)> {
    let value = params.get("value")?;
    if value.get("type").and_then(Value::as_str) != Some(ICE_CANDIDATE_FOUND) {
        return None;
    }
    let object = value
        .get("object")
        .or_else(|| value.get("data").and_then(|data| data.get("source")))
        .and_then(Value::as_str)?;
    let candidate = value.get("data")?.get("candidate")?.clone();
    let candidate = serde_json::from_value(candidate).ok()?;
    Some((EndpointId(object.to_string()), candidate))
}

fn string_value(result: &Value) -> Result<String, MediaError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MediaError::Protocol(format!("expected string value in {result}")))
}

async fn writer_task(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write.send(msg).await {
            error!("failed to write to media engine: {}", e);
            break;
        }
    }
    let _ = write.close().await;
    debug!("media engine writer stopped");
}

async fn reader_task(mut read: SplitStream<WsStream>, inner: Weak<Inner>) {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                error!("media engine socket error: {}", e);
                break;
            }
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_frame(text.as_str()).await;
    }

    if let Some(inner) = inner.upgrade() {
        error!("media engine connection lost");
        inner.fail_all().await;
    }
}

async fn keepalive_task(inner: Weak<Inner>) {
    let Some(interval) = inner.upgrade().map(|i| i.options.keepalive_interval) else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let params = json!({ "interval": interval.as_millis() as u64 });
        match inner.request("ping", params).await {
            Ok(_) => trace!("media engine keepalive"),
            Err(MediaError::Closed) => return,
            Err(e) => warn!("media engine keepalive failed: {}", e),
        }
    }
}

#[async_trait]
impl MediaEngine for KurentoClient {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError> {
        let id = self.create("MediaPipeline", json!({})).await?;
        Ok(PipelineId(id))
    }

    async fn create_endpoint(&self, pipeline: &PipelineId) -> Result<EndpointId, MediaError> {
        let id = self
            .create("WebRtcEndpoint", json!({ "mediaPipeline": pipeline.0 }))
            .await?;
        Ok(EndpointId(id))
    }

    async fn process_offer(
        &self,
        endpoint: &EndpointId,
        offer: &str,
    ) -> Result<String, MediaError> {
        let result = self
            .invoke(&endpoint.0, "processOffer", json!({ "offer": offer }))
            .await?;
        string_value(&result)
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        self.invoke(&endpoint.0, "gatherCandidates", json!({}))
            .await
            .map(|_| ())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        let candidate = json!({
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": candidate.candidate,
            "sdpMid": candidate.sdp_mid,
            "sdpMLineIndex": candidate.sdp_m_line_index,
        });
        self.invoke(&endpoint.0, "addIceCandidate", json!({ "candidate": candidate }))
            .await
            .map(|_| ())
    }

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), MediaError> {
        self.invoke(&source.0, "connect", json!({ "sink": sink.0 }))
            .await
            .map(|_| ())
    }

    async fn subscribe_ice_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<IceCandidateStream, MediaError> {
        // Register the sink first so no event can slip in before the reply.
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .ice_sinks
            .lock()
            .await
            .insert(endpoint.clone(), tx);

        let subscribed = self
            .inner
            .request(
                "subscribe",
                json!({ "type": ICE_CANDIDATE_FOUND, "object": endpoint.0 }),
            )
            .await;
        if let Err(err) = subscribed {
            self.inner.ice_sinks.lock().await.remove(endpoint);
            return Err(err);
        }
        Ok(rx)
    }

    async fn release_endpoint(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        self.inner.ice_sinks.lock().await.remove(endpoint);
        self.release(&endpoint.0).await
    }

    async fn release_pipeline(&self, pipeline: &PipelineId) -> Result<(), MediaError> {
        self.release(&pipeline.0).await
    }
}
