//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::store::{LadderEntry, LadderError, Outcome};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::ReplayFrame;

const DEFAULT_LEADERBOARD_LIMIT: usize = 100;
const MAX_LEADERBOARD_LIMIT: usize = 1_000;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/ladder", get(leaderboard_handler))
        .route("/ladder/results", post(record_result_handler))
        .route(
            "/replays/:shard_id",
            get(replay_handler).delete(clear_replay_handler),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_shards: usize,
    active_players: usize,
    queue_size: usize,
    replay_shards: usize,
    connected_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_shards: state.shard_registry.active_shards(),
        active_players: state.shard_registry.total_players(),
        queue_size,
        replay_shards: state.replays.shard_count(),
        connected_players: state.sessions.len(),
    })
}

// ============================================================================
// Ladder endpoints
// ============================================================================

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<Vec<LadderEntry>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .min(MAX_LEADERBOARD_LIMIT);
    Json(state.ladder.leaderboard(limit))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchResultRequest {
    winner_id: String,
    loser_id: String,
}

async fn record_result_handler(
    State(state): State<AppState>,
    Json(req): Json<MatchResultRequest>,
) -> Result<Json<Outcome>, AppError> {
    let outcome = state
        .ladder
        .record_outcome(&req.winner_id, &req.loser_id)?;
    Ok(Json(outcome))
}

// ============================================================================
// Replay endpoints
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayResponse {
    shard_id: String,
    frames: Vec<ReplayFrame>,
}

async fn replay_handler(
    State(state): State<AppState>,
    Path(shard_id): Path<String>,
) -> Result<Json<ReplayResponse>, AppError> {
    let frames = state
        .replays
        .get(&shard_id)
        .ok_or_else(|| AppError::NotFound(format!("no replay for {}", shard_id)))?;
    Ok(Json(ReplayResponse { shard_id, frames }))
}

async fn clear_replay_handler(
    State(state): State<AppState>,
    Path(shard_id): Path<String>,
) -> StatusCode {
    state.replays.clear(&shard_id);
    StatusCode::NO_CONTENT
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<LadderError> for AppError {
    fn from(e: LadderError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ws::protocol::{Position, StateSnapshot};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = router.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = AppState::new(Config::default());
        let (status, body) = call(build_router(state), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeShards"], 0);
        assert_eq!(body["activePlayers"], 0);
        assert_eq!(body["queueSize"], 0);
        assert_eq!(body["replayShards"], 0);
        assert_eq!(body["connectedPlayers"], 0);
    }

    #[tokio::test]
    async fn recorded_result_shows_on_leaderboard() {
        let state = AppState::new(Config::default());
        let (status, body) = call(
            build_router(state.clone()),
            Method::POST,
            "/ladder/results",
            Some(json!({ "winnerId": "w", "loserId": "l" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["winnerMmr"], 1016);
        assert_eq!(body["loserMmr"], 984);

        let (status, body) = call(build_router(state), Method::GET, "/ladder?limit=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{ "rank": 1, "playerId": "w", "mmr": 1016 }]));
    }

    #[tokio::test]
    async fn self_result_is_bad_request() {
        let state = AppState::new(Config::default());
        let (status, _) = call(
            build_router(state),
            Method::POST,
            "/ladder/results",
            Some(json!({ "winnerId": "a", "loserId": "a" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replay_lookup_and_clear() {
        let state = AppState::new(Config::default());
        let (status, _) = call(build_router(state.clone()), Method::GET, "/replays/shard-x", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut snapshot = StateSnapshot::new();
        snapshot.insert("p".into(), Position { x: 1.0, z: -2.0 });
        state.replays.record("shard-x", 0, snapshot);

        let (status, body) = call(build_router(state.clone()), Method::GET, "/replays/shard-x", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shardId"], "shard-x");
        assert_eq!(body["frames"][0]["frame"], 0);
        assert_eq!(body["frames"][0]["state"]["p"]["z"], -2.0);

        let (status, _) = call(build_router(state.clone()), Method::DELETE, "/replays/shard-x", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.replays.get("shard-x").is_none());
    }
}
