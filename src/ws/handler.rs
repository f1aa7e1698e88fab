//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::matchmaking::QueueError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{
    decode, encode, ClientMsg, ErrorCode, MessageKind, ProtocolError, ServerMsg, PROTOCOL_VERSION,
};
use crate::ws::{Delivery, PlayerConnection};

/// Outbound queue depth per connection
const OUTBOUND_BUFFER: usize = 64;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    let (close_tx, close_rx) = oneshot::channel();

    let mut session = Session::new(PlayerConnection::new(outbound_tx), state);
    let conn_id = session.connection.id;
    info!(conn_id = %conn_id, "New WebSocket connection");

    let mut writer = tokio::spawn(write_loop(ws_sink, outbound_rx, close_rx));

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if session.on_text(&text).await == Flow::Close {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Let queued replies (close reasons included) reach the client
    let _ = close_tx.send(());
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    session.close().await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Drain the outbound queue into the socket until told to close
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                if send_msg(&mut sink, &msg).await.is_err() {
                    break;
                }
            }
            _ = &mut close_rx => {
                while let Ok(msg) = outbound_rx.try_recv() {
                    if send_msg(&mut sink, &msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = encode(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Whether the reader loop keeps going after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Protocol state of one connection, independent of the socket
struct Session {
    connection: PlayerConnection,
    /// Set once the handshake succeeded
    player_id: Option<String>,
    limiter: ConnectionRateLimiter,
    state: AppState,
}

impl Session {
    fn new(connection: PlayerConnection, state: AppState) -> Self {
        Self {
            limiter: ConnectionRateLimiter::new(state.config.gateway.max_msgs_per_sec),
            connection,
            player_id: None,
            state,
        }
    }

    fn reply(&self, msg: ServerMsg) {
        let kind = msg.kind();
        if self.connection.send(msg) == Delivery::Full {
            warn!(conn_id = %self.connection.id, kind = kind.as_str(), "Outbound queue full, reply dropped");
        }
    }

    fn reject(&self, code: ErrorCode, reason: impl Into<String>) -> Flow {
        let reason = reason.into();
        warn!(conn_id = %self.connection.id, code = code.as_str(), reason = %reason, "Closing connection");
        self.reply(ServerMsg::error(code, reason));
        Flow::Close
    }

    /// Process one inbound text frame
    async fn on_text(&mut self, text: &str) -> Flow {
        if !self.limiter.check_message() {
            return self.reject(ErrorCode::RateLimit, "message rate exceeded");
        }
        if text.len() > self.state.config.gateway.max_payload_bytes {
            return self.reject(ErrorCode::PayloadTooLarge, "payload too large");
        }

        let decoded = decode(text);
        let Some(player_id) = self.player_id.clone() else {
            return self.on_handshake(decoded);
        };

        match decoded {
            Ok(msg) => self.on_message(&player_id, msg).await,
            Err(ProtocolError::VersionMismatch { got }) => self.reject(
                ErrorCode::VersionMismatch,
                format!("expected version {}, got {}", PROTOCOL_VERSION, got),
            ),
            // Bad input is dropped without telling the sender
            Err(ProtocolError::BadPayload {
                kind: MessageKind::Input,
                ..
            }) => Flow::Continue,
            Err(e) => self.reject(ErrorCode::BadMessage, e.to_string()),
        }
    }

    /// First frame of the connection
    fn on_handshake(&mut self, decoded: Result<ClientMsg, ProtocolError>) -> Flow {
        match decoded {
            Ok(ClientMsg::Handshake(hello)) if hello.is_valid() => {
                let player_id = hello.player_id.trim().to_string();
                if !self.state.sessions.claim(&player_id, self.connection.id) {
                    return self.reject(
                        ErrorCode::PlayerIdInUse,
                        format!("player {} is already connected", player_id),
                    );
                }
                info!(conn_id = %self.connection.id, player_id = %player_id, "Handshake accepted");
                self.player_id = Some(player_id);
                self.reply(ServerMsg::Handshake {
                    ok: true,
                    version: PROTOCOL_VERSION,
                });
                Flow::Continue
            }
            Err(ProtocolError::VersionMismatch { got }) => self.reject(
                ErrorCode::VersionMismatch,
                format!("expected version {}, got {}", PROTOCOL_VERSION, got),
            ),
            Ok(_) => self.reject(ErrorCode::BadHandshake, "expected a valid handshake"),
            Err(e) => self.reject(ErrorCode::BadHandshake, e.to_string()),
        }
    }

    async fn on_message(&mut self, player_id: &str, msg: ClientMsg) -> Flow {
        match msg {
            ClientMsg::JoinQueue => {
                let joined = self
                    .state
                    .matchmaking
                    .enqueue(self.connection.clone(), player_id)
                    .await;
                match joined {
                    Ok(_) => {}
                    Err(QueueError::InMatch) => {
                        self.reply(ServerMsg::error(ErrorCode::InMatch, "already in a match"));
                    }
                    Err(QueueError::PlayerIdInUse) => {
                        self.reply(ServerMsg::error(ErrorCode::PlayerIdInUse, "player id already in use"));
                    }
                }
            }
            ClientMsg::Input(payload) => {
                if !payload.is_valid() {
                    debug!(conn_id = %self.connection.id, player_id = %player_id, "Dropping out-of-range input");
                } else if !self
                    .state
                    .shard_registry
                    .route_input(self.connection.id, payload.into())
                {
                    debug!(conn_id = %self.connection.id, player_id = %player_id, "Input without a live shard");
                }
            }
            ClientMsg::ReplayRequest(request) => {
                let frames = self.state.replays.get(&request.shard_id);
                self.reply(ServerMsg::ReplayData {
                    shard_id: request.shard_id,
                    frames,
                });
            }
            ClientMsg::Ping(ping) => self.reply(ServerMsg::Pong { t: ping.t }),
            ClientMsg::Handshake(_) => {
                self.reply(ServerMsg::error(ErrorCode::UnknownMessage, "handshake already done"));
            }
            ClientMsg::Unsupported(kind) => {
                self.reply(ServerMsg::error(
                    ErrorCode::UnknownMessage,
                    format!("{} is not accepted from clients", kind.as_str()),
                ));
            }
            ClientMsg::Unknown(tag) => {
                self.reply(ServerMsg::error(
                    ErrorCode::UnknownMessage,
                    format!("unknown message type {}", tag),
                ));
            }
        }
        Flow::Continue
    }

    /// Connection teardown: leave the queue, leave the shard, release the
    /// player id and forget its history
    async fn close(self) {
        let conn_id = self.connection.id;
        self.state.matchmaking.remove_player(conn_id).await;
        if let Some(shard_id) = self.state.shard_registry.detach(conn_id).await {
            debug!(conn_id = %conn_id, shard_id = %shard_id, "Detached from shard");
        }
        if let Some(player_id) = &self.player_id {
            // Only the owning connection may end the player's lifetime
            if self.state.sessions.release(player_id, conn_id) {
                self.state.anti_cheat.forget(player_id);
            }
        } else {
            debug!(conn_id = %conn_id, "Connection closed before handshake");
        }
    }
}
