use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use webcast_common::{ClientMessage, ServerMessage, SignalError};

use crate::channel::Channel;
use crate::peers::{ConnectionId, Peers};

/// Transport cap; a frame beyond this closes the socket.
const WS_MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Largest text frame that is decoded. Bigger frames get an `error` reply and
/// the connection stays open.
pub const WS_MAX_TEXT_BYTES: usize = 256 * 1024;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(channel): State<Arc<Channel>>,
    State(peers): State<Peers>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(WS_MAX_FRAME_BYTES)
        .max_frame_size(WS_MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, channel, peers, addr))
}

async fn handle_socket(stream: WebSocket, channel: Arc<Channel>, peers: Peers, addr: SocketAddr) {
    let connection = ConnectionId::new();
    info!(%connection, "client connected from {}", addr);

    let (sender, mut receiver) = stream.split();
    let outbox = peers.register(connection).await;

    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);
    tokio::spawn(pump_outbox(outbox, sender, connection, disconnect_tx));

    loop {
        let msg = tokio::select! {
            _ = disconnect_rx.recv() => {
                debug!(%connection, "write side closed");
                break;
            }
            msg = receiver.next() => msg,
        };

        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(%connection, "websocket error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => dispatch(&channel, &peers, connection, &text).await,
            Message::Binary(_) => {
                peers
                    .deliver(
                        connection,
                        ServerMessage::error("Binary messages are not supported"),
                    )
                    .await;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    // A vanished client is treated exactly like an explicit stop.
    channel.stop(connection).await;
    peers.unregister(connection).await;
    info!(%connection, "client disconnected");
}

/// Move queued messages onto the socket. Signals `disconnect` once the socket
/// stops accepting writes or the outbox is closed.
async fn pump_outbox<S>(
    mut outbox: mpsc::Receiver<ServerMessage>,
    mut sink: S,
    connection: ConnectionId,
    disconnect: mpsc::Sender<()>,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = sink.send(Message::Text(msg.encode())).await {
            debug!(%connection, "failed to write to client: {}", e);
            break;
        }
    }
    let _ = disconnect.try_send(());
}

/// Route one inbound text frame from `connection`.
///
/// Every rejected or failed request produces exactly one `error` message
/// back to the sender; nothing propagates further.
pub async fn dispatch(channel: &Channel, peers: &Peers, connection: ConnectionId, text: &str) {
    let result = if text.len() > WS_MAX_TEXT_BYTES {
        Err(SignalError::malformed(format!(
            "frame of {} bytes exceeds the {} byte limit",
            text.len(),
            WS_MAX_TEXT_BYTES
        )))
    } else {
        match ClientMessage::decode(text) {
            Ok(message) => {
                trace!(%connection, kind = message.kind(), "inbound message");
                handle_message(channel, peers, connection, message).await
            }
            Err(err) => Err(err),
        }
    };

    if let Err(err) = result {
        warn!(%connection, "request rejected: {}", err);
        peers.deliver(connection, ServerMessage::error(&err)).await;
    }
}

async fn handle_message(
    channel: &Channel,
    peers: &Peers,
    connection: ConnectionId,
    message: ClientMessage,
) -> Result<(), SignalError> {
    match message {
        ClientMessage::Publish { sdp_offer } => channel.publish(connection, &sdp_offer).await,
        ClientMessage::Play { sdp_offer } => channel.play(connection, &sdp_offer).await,
        ClientMessage::OnIceCandidate { candidate } => {
            channel.add_ice_candidate(connection, candidate).await
        }
        ClientMessage::Stop => {
            channel.stop(connection).await;
            Ok(())
        }
        ClientMessage::Ping => {
            peers.deliver(connection, ServerMessage::Pong).await;
            Ok(())
        }
    }
}
