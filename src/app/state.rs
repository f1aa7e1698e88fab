//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{AntiCheatValidator, InterestManager, ShardRegistry, SimulationContext};
use crate::matchmaking::MatchmakingService;
use crate::store::{Ladder, ReplayStore};
use crate::ws::PlayerSessions;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: Arc<MatchmakingService>,
    pub shard_registry: Arc<ShardRegistry>,
    pub ladder: Arc<Ladder>,
    pub replays: Arc<ReplayStore>,
    pub anti_cheat: Arc<AntiCheatValidator>,
    /// Player id ownership, one live connection per id
    pub sessions: Arc<PlayerSessions>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Process-wide stores
        let ladder = Arc::new(Ladder::new(config.ladder.clone()));
        let replays = Arc::new(ReplayStore::new(&config.replay));
        let anti_cheat = Arc::new(AntiCheatValidator::new(&config.anti_cheat, &config.world));

        // Initialize shard registry
        let shard_registry = Arc::new(ShardRegistry::new());

        // Every shard ticks against the same collaborators
        let ctx = SimulationContext {
            world: config.world.clone(),
            anti_cheat: anti_cheat.clone(),
            interest: InterestManager::new(&config.interest),
            replays: replays.clone(),
        };

        let matchmaking = Arc::new(MatchmakingService::new(
            &config.matchmaking,
            ladder.clone(),
            shard_registry.clone(),
            ctx,
        ));

        Self {
            config,
            matchmaking,
            shard_registry,
            ladder,
            replays,
            anti_cheat,
            sessions: Arc::new(PlayerSessions::new()),
        }
    }
}
