//! Game simulation modules

pub mod anti_cheat;
pub mod interest;
pub mod physics;
pub mod shard;
pub mod snapshot;

pub use anti_cheat::{AntiCheatValidator, MovementVerdict};
pub use interest::InterestManager;
pub use shard::{PlayerState, Shard, ShardRegistry};

use std::sync::Arc;

use crate::config::WorldConfig;
use crate::store::ReplayStore;
use crate::ws::protocol::InputPayload;

/// One frame of movement intent, already range-checked by the protocol layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSample {
    pub frame: u64,
    pub dx: f32,
    pub dz: f32,
}

impl InputSample {
    /// Zero-motion input used when nothing was buffered for a frame
    pub fn idle(frame: u64) -> Self {
        Self {
            frame,
            dx: 0.0,
            dz: 0.0,
        }
    }
}

impl From<InputPayload> for InputSample {
    fn from(payload: InputPayload) -> Self {
        Self {
            frame: payload.frame,
            dx: payload.dx as f32,
            dz: payload.dz as f32,
        }
    }
}

/// Process-wide collaborators every shard ticks against
#[derive(Clone)]
pub struct SimulationContext {
    pub world: WorldConfig,
    pub anti_cheat: Arc<AntiCheatValidator>,
    pub interest: InterestManager,
    pub replays: Arc<ReplayStore>,
}
