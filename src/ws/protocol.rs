//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is an envelope `{ "v": version, "t": kind, "d": payload }`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version every envelope must carry
pub const PROTOCOL_VERSION: u32 = 1;

/// Inclusive bound on each input direction component
pub const MOVE_MIN: f32 = -1.0;
pub const MOVE_MAX: f32 = 1.0;

/// The closed set of message kinds on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Handshake,
    JoinQueue,
    MatchFound,
    Input,
    State,
    Snapshot,
    Spectate,
    ReplayRequest,
    ReplayData,
    Ping,
    Pong,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        Self::Handshake,
        Self::JoinQueue,
        Self::MatchFound,
        Self::Input,
        Self::State,
        Self::Snapshot,
        Self::Spectate,
        Self::ReplayRequest,
        Self::ReplayData,
        Self::Ping,
        Self::Pong,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::JoinQueue => "join_queue",
            Self::MatchFound => "match_found",
            Self::Input => "input",
            Self::State => "state",
            Self::Snapshot => "snapshot",
            Self::Spectate => "spectate",
            Self::ReplayRequest => "replay_request",
            Self::ReplayData => "replay_data",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

/// A world position on the ground plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub z: f32,
}

/// playerId -> position, ordered for stable output
pub type StateSnapshot = BTreeMap<String, Position>;

/// One recorded frame of a shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub frame: u64,
    pub state: StateSnapshot,
}

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub version: u32,
    pub player_id: String,
}

impl HandshakePayload {
    pub fn is_valid(&self) -> bool {
        self.version == PROTOCOL_VERSION && !self.player_id.trim().is_empty()
    }
}

/// Movement input for one frame. Components stay `f64` until the range
/// check so values just past the bound cannot round onto it.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct InputPayload {
    pub frame: u64,
    pub dx: f64,
    pub dz: f64,
}

impl InputPayload {
    /// Range check: each component finite and within [-1, 1]
    pub fn is_valid(&self) -> bool {
        let in_range = |v: f64| v.is_finite() && (MOVE_MIN as f64..=MOVE_MAX as f64).contains(&v);
        in_range(self.dx) && in_range(self.dz)
    }
}

pub fn in_move_range(v: f32) -> bool {
    v.is_finite() && (MOVE_MIN..=MOVE_MAX).contains(&v)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequestPayload {
    pub shard_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingPayload {
    pub t: u64,
}

/// Messages sent from client to server
#[derive(Debug, Clone)]
pub enum ClientMsg {
    Handshake(HandshakePayload),
    JoinQueue,
    Input(InputPayload),
    ReplayRequest(ReplayRequestPayload),
    Ping(PingPayload),
    /// A known kind that clients are not allowed to send
    Unsupported(MessageKind),
    /// A tag outside the protocol
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    v: u32,
    t: String,
    #[serde(default)]
    d: serde_json::Value,
}

/// Decode one inbound text frame
pub fn decode(raw: &str) -> Result<ClientMsg, ProtocolError> {
    let envelope: RawEnvelope =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if envelope.v != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch { got: envelope.v });
    }

    let Some(kind) = MessageKind::parse(&envelope.t) else {
        return Ok(ClientMsg::Unknown(envelope.t));
    };

    let payload = envelope.d;
    let bad = |e: serde_json::Error| ProtocolError::BadPayload {
        kind,
        reason: e.to_string(),
    };

    match kind {
        MessageKind::Handshake => serde_json::from_value(payload)
            .map(ClientMsg::Handshake)
            .map_err(bad),
        MessageKind::JoinQueue => Ok(ClientMsg::JoinQueue),
        MessageKind::Input => serde_json::from_value(payload)
            .map(ClientMsg::Input)
            .map_err(bad),
        MessageKind::ReplayRequest => serde_json::from_value(payload)
            .map(ClientMsg::ReplayRequest)
            .map_err(bad),
        MessageKind::Ping => serde_json::from_value(payload)
            .map(ClientMsg::Ping)
            .map_err(bad),
        MessageKind::MatchFound
        | MessageKind::State
        | MessageKind::Snapshot
        | MessageKind::Spectate
        | MessageKind::ReplayData
        | MessageKind::Pong
        | MessageKind::Error => Ok(ClientMsg::Unsupported(kind)),
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Machine-readable reason codes carried by `error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadHandshake,
    VersionMismatch,
    BadMessage,
    PayloadTooLarge,
    RateLimit,
    UnknownMessage,
    InMatch,
    PlayerIdInUse,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadHandshake => "BAD_HANDSHAKE",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::BadMessage => "BAD_MESSAGE",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RateLimit => "RATE_LIMIT",
            Self::UnknownMessage => "UNKNOWN_MESSAGE",
            Self::InMatch => "IN_MATCH",
            Self::PlayerIdInUse => "PLAYER_ID_IN_USE",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Handshake accepted
    Handshake { ok: bool, version: u32 },

    /// Queue join acknowledged with the rating used for grouping
    JoinQueue { ok: bool, mmr: i32 },

    /// A match formed; the shard is about to start
    MatchFound {
        #[serde(rename = "shardId")]
        shard_id: String,
        players: Vec<String>,
    },

    /// Per-observer filtered world state for one frame
    Snapshot { frame: u64, state: StateSnapshot },

    /// Recorded frames of a shard, or null if none are stored
    ReplayData {
        #[serde(rename = "shardId")]
        shard_id: String,
        frames: Option<Vec<ReplayFrame>>,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },

    /// Error message
    Error { code: String, reason: String },
}

impl ServerMsg {
    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_str().to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Handshake { .. } => MessageKind::Handshake,
            Self::JoinQueue { .. } => MessageKind::JoinQueue,
            Self::MatchFound { .. } => MessageKind::MatchFound,
            Self::Snapshot { .. } => MessageKind::Snapshot,
            Self::ReplayData { .. } => MessageKind::ReplayData,
            Self::Pong { .. } => MessageKind::Pong,
            Self::Error { .. } => MessageKind::Error,
        }
    }
}

/// Encode a server message into a versioned envelope
pub fn encode(msg: &ServerMsg) -> Result<String, ProtocolError> {
    let mut value =
        serde_json::to_value(msg).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("v".to_string(), serde_json::Value::from(PROTOCOL_VERSION));
    }
    serde_json::to_string(&value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Snapshot sanity check: every position finite and inside the world
pub fn validate_state(state: &StateSnapshot, world_size: f32) -> bool {
    state.values().all(|p| {
        p.x.is_finite() && p.z.is_finite() && p.x.abs() <= world_size && p.z.abs() <= world_size
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("protocol version mismatch: got {got}, expected {}", PROTOCOL_VERSION)]
    VersionMismatch { got: u32 },

    #[error("bad {} payload: {reason}", .kind.as_str())]
    BadPayload { kind: MessageKind, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(String),
}
