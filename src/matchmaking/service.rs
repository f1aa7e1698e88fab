//! Matchmaking service - manages queue and match creation

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MatchmakingConfig;
use crate::game::{Shard, ShardRegistry, SimulationContext};
use crate::store::Ladder;
use crate::ws::protocol::ServerMsg;
use crate::ws::{ConnectionId, Delivery, PlayerConnection};

use super::queue::{MatchmakingQueue, QueuedPlayer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("connection is already placed in a shard")]
    InMatch,

    #[error("player id is held by another connection")]
    PlayerIdInUse,
}

/// Matchmaking service
pub struct MatchmakingService {
    queue: Mutex<MatchmakingQueue>,
    ladder: Arc<Ladder>,
    registry: Arc<ShardRegistry>,
    ctx: SimulationContext,
}

impl MatchmakingService {
    pub fn new(
        config: &MatchmakingConfig,
        ladder: Arc<Ladder>,
        registry: Arc<ShardRegistry>,
        ctx: SimulationContext,
    ) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new(
                config.match_size,
                config.mmr_range,
                config.strategy,
            )),
            ladder,
            registry,
            ctx,
        }
    }

    /// Join the queue and attempt to form a match right away.
    /// Returns the rating estimate the player was queued with.
    pub async fn enqueue(
        &self,
        connection: PlayerConnection,
        player_id: &str,
    ) -> Result<i32, QueueError> {
        if self.registry.is_assigned(connection.id) {
            return Err(QueueError::InMatch);
        }

        let mut queue = self.queue.lock().await;
        let held_elsewhere = |holder: Option<ConnectionId>| holder.is_some_and(|c| c != connection.id);
        if held_elsewhere(queue.connection_of(player_id))
            || held_elsewhere(self.registry.connection_of(player_id))
        {
            warn!(player_id = %player_id, conn_id = %connection.id, "Player id already queued or playing elsewhere");
            return Err(QueueError::PlayerIdInUse);
        }

        let rating = self.ladder.get_rating(player_id);
        let ack = ServerMsg::JoinQueue {
            ok: true,
            mmr: rating,
        };
        if connection.send(ack) != Delivery::Sent {
            warn!(player_id = %player_id, "Could not acknowledge queue join");
        }

        queue.enqueue(QueuedPlayer::new(connection, player_id.to_string(), rating));
        info!(player_id = %player_id, rating, queue_size = queue.len(), "Player joined matchmaking queue");

        self.try_match(&mut queue);
        Ok(rating)
    }

    /// Drop a still-queued connection. No-op if absent or already matched.
    pub async fn remove_player(&self, connection: ConnectionId) {
        let mut queue = self.queue.lock().await;
        if let Some(player) = queue.remove_by_connection(connection) {
            info!(player_id = %player.player_id, waited_ms = player.wait_time().as_millis() as u64, "Player left matchmaking queue");
            self.try_match(&mut queue);
        }
    }

    /// At most one match per call. Runs under the queue lock so a player
    /// cannot be selected twice or be picked after removal.
    fn try_match(&self, queue: &mut MatchmakingQueue) {
        if let Some(players) = queue.try_form_match() {
            self.create_match(players);
        }
    }

    /// Build a shard for the group, notify everyone and start ticking
    fn create_match(&self, players: Vec<QueuedPlayer>) {
        let shard_id = format!("shard-{}", Uuid::new_v4().simple());

        let roster: Vec<(String, PlayerConnection)> = players
            .iter()
            .filter(|p| p.connection.is_open())
            .map(|p| (p.player_id.clone(), p.connection.clone()))
            .collect();

        if roster.is_empty() {
            warn!(shard_id = %shard_id, "Every matched connection closed before start");
            return;
        }

        let (shard, handle) = Shard::new(
            shard_id.clone(),
            roster.clone(),
            self.ctx.clone(),
            self.registry.clone(),
        );
        self.registry.insert(handle);

        let player_ids: Vec<String> = roster.iter().map(|(id, _)| id.clone()).collect();
        for (player_id, connection) in &roster {
            self.registry.assign(connection.id, &shard_id, player_id);
            let found = ServerMsg::MatchFound {
                shard_id: shard_id.clone(),
                players: player_ids.clone(),
            };
            if connection.send(found) != Delivery::Sent {
                warn!(shard_id = %shard_id, player_id = %player_id, "Could not deliver match_found");
            }
        }

        info!(
            shard_id = %shard_id,
            player_count = roster.len(),
            dropped = players.len() - roster.len(),
            "Created new match"
        );

        shard.start();
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Check if a connection is in the queue
    pub async fn is_in_queue(&self, connection: ConnectionId) -> bool {
        self.queue.lock().await.contains(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AntiCheatConfig, InterestConfig, LadderConfig, MatchStrategy, ReplayConfig, WorldConfig,
    };
    use crate::game::{AntiCheatValidator, InterestManager};
    use crate::store::ReplayStore;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    struct Harness {
        service: MatchmakingService,
        ladder: Arc<Ladder>,
        registry: Arc<ShardRegistry>,
    }

    fn harness(match_size: usize) -> Harness {
        let world = WorldConfig::default();
        let ctx = SimulationContext {
            anti_cheat: Arc::new(AntiCheatValidator::new(&AntiCheatConfig::default(), &world)),
            interest: InterestManager::new(&InterestConfig::default()),
            replays: Arc::new(ReplayStore::new(&ReplayConfig::default())),
            world,
        };
        let ladder = Arc::new(Ladder::new(LadderConfig::default()));
        let registry = Arc::new(ShardRegistry::new());
        let config = MatchmakingConfig {
            match_size,
            mmr_range: 200,
            strategy: MatchStrategy::FirstFit,
        };
        Harness {
            service: MatchmakingService::new(&config, ladder.clone(), registry.clone(), ctx),
            ladder,
            registry,
        }
    }

    fn connect() -> (PlayerConnection, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(256);
        (PlayerConnection::new(tx), rx)
    }

    #[tokio::test]
    async fn enqueue_acknowledges_with_rating() {
        let h = harness(2);
        let (conn, mut rx) = connect();
        assert_eq!(h.service.enqueue(conn.clone(), "a").await, Ok(1000));
        assert!(matches!(rx.try_recv(), Ok(ServerMsg::JoinQueue { ok: true, mmr: 1000 })));
        assert!(h.service.is_in_queue(conn.id).await);
        assert_eq!(h.service.queue_size().await, 1);
    }

    #[tokio::test]
    async fn two_close_players_get_one_shard() {
        let h = harness(2);
        // Nudge ratings to 984 and 1016, well inside the band
        h.ladder.record_outcome("b", "a").unwrap();

        let (conn_a, mut rx_a) = connect();
        let (conn_b, mut rx_b) = connect();
        assert_ok!(h.service.enqueue(conn_a.clone(), "a").await);
        assert_ok!(h.service.enqueue(conn_b.clone(), "b").await);

        assert_eq!(h.service.queue_size().await, 0);
        assert_eq!(h.registry.active_shards(), 1);
        assert_eq!(h.registry.shard_of(conn_a.id), h.registry.shard_of(conn_b.id));

        for rx in [&mut rx_a, &mut rx_b] {
            assert!(matches!(rx.recv().await, Some(ServerMsg::JoinQueue { .. })));
            match rx.recv().await {
                Some(ServerMsg::MatchFound { shard_id, players }) => {
                    assert!(shard_id.starts_with("shard-"));
                    assert_eq!(players.len(), 2);
                    assert!(players.contains(&"a".to_string()));
                    assert!(players.contains(&"b".to_string()));
                }
                other => panic!("unexpected {:?}", other),
            }
            match rx.recv().await {
                Some(ServerMsg::Snapshot { frame, .. }) => assert_eq!(frame, 0),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn assigned_connection_cannot_queue_again() {
        let h = harness(1);
        let (conn, _rx) = connect();
        h.service.enqueue(conn.clone(), "solo").await.unwrap();
        assert!(h.registry.is_assigned(conn.id));
        assert_eq!(h.service.enqueue(conn, "solo").await, Err(QueueError::InMatch));
    }

    #[tokio::test]
    async fn one_player_id_never_fills_two_roster_slots() {
        let h = harness(2);
        let (conn_a, _rx_a) = connect();
        let (conn_b, _rx_b) = connect();
        assert_ok!(h.service.enqueue(conn_a.clone(), "x").await);
        assert_eq!(
            h.service.enqueue(conn_b.clone(), "x").await,
            Err(QueueError::PlayerIdInUse)
        );
        assert_eq!(h.service.queue_size().await, 1);
        assert_eq!(h.registry.active_shards(), 0);

        // Still refused once the id is playing in a shard
        let (conn_y, _rx_y) = connect();
        assert_ok!(h.service.enqueue(conn_y, "y").await);
        assert!(h.registry.is_assigned(conn_a.id));
        assert_eq!(
            h.service.enqueue(conn_b, "x").await,
            Err(QueueError::PlayerIdInUse)
        );
    }

    #[tokio::test]
    async fn removed_player_is_never_matched() {
        let h = harness(2);
        let (conn_a, _rx_a) = connect();
        let (conn_b, _rx_b) = connect();
        h.service.enqueue(conn_a.clone(), "a").await.unwrap();
        h.service.remove_player(conn_a.id).await;
        h.service.remove_player(conn_a.id).await;
        h.service.enqueue(conn_b, "b").await.unwrap();
        assert_eq!(h.registry.active_shards(), 0);
        assert_eq!(h.service.queue_size().await, 1);
    }

    #[tokio::test]
    async fn closed_connections_are_left_out_of_the_shard() {
        let h = harness(2);
        let (conn_a, rx_a) = connect();
        let (conn_b, mut rx_b) = connect();
        h.service.enqueue(conn_a.clone(), "a").await.unwrap();
        drop(rx_a);
        h.service.enqueue(conn_b.clone(), "b").await.unwrap();

        assert!(!h.registry.is_assigned(conn_a.id));
        assert!(h.registry.is_assigned(conn_b.id));
        let _ack = rx_b.recv().await;
        match rx_b.recv().await {
            Some(ServerMsg::MatchFound { players, .. }) => assert_eq!(players, vec!["b".to_string()]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
