//! Server-side movement validation
//!
//! Two independent checks run inside the tick:
//! - the instantaneous range check on a resolved input sample
//! - the movement budget, which bounds displacement per elapsed frame
//!   against the last accepted position of the player
//!
//! Histories are process-wide per player, not per shard. A rejected
//! attempt never moves the baseline.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::config::{AntiCheatConfig, WorldConfig};
use crate::ws::protocol::{in_move_range, Position};

use super::InputSample;

/// Why a movement was refused
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheatReason {
    /// Direction component outside [-1, 1] or not finite
    InputOutOfRange,
    /// Frame did not advance past the last accepted one
    StaleFrame { last_frame: u64, frame: u64 },
    /// Gap since the last accepted frame exceeds the desync tolerance
    FrameDesync { frame_delta: u64 },
    /// Displacement larger than the speed budget allows
    SpeedExceeded { distance: f32, allowed: f32 },
    /// Proposed position is NaN or infinite
    NonFinitePosition,
}

impl CheatReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputOutOfRange => "input_out_of_range",
            Self::StaleFrame { .. } => "stale_frame",
            Self::FrameDesync { .. } => "frame_desync",
            Self::SpeedExceeded { .. } => "speed_exceeded",
            Self::NonFinitePosition => "non_finite_position",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementVerdict {
    Accept,
    Reject(CheatReason),
}

impl MovementVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

#[derive(Debug, Clone, Copy)]
struct History {
    last_x: f32,
    last_z: f32,
    last_frame: u64,
}

/// Per-player movement-consistency oracle
pub struct AntiCheatValidator {
    max_frame_desync: u64,
    teleport_epsilon: f32,
    max_speed: f32,
    tick_rate: f32,
    histories: DashMap<String, History>,
    strikes: DashMap<String, u32>,
}

impl AntiCheatValidator {
    pub fn new(config: &AntiCheatConfig, world: &WorldConfig) -> Self {
        Self {
            max_frame_desync: config.max_frame_desync,
            teleport_epsilon: config.teleport_epsilon,
            max_speed: world.max_speed,
            tick_rate: world.tick_rate.max(1) as f32,
            histories: DashMap::new(),
            strikes: DashMap::new(),
        }
    }

    /// Instantaneous direction check on a resolved sample
    pub fn validate_input_range(&self, sample: &InputSample) -> MovementVerdict {
        if in_move_range(sample.dx) && in_move_range(sample.dz) {
            MovementVerdict::Accept
        } else {
            MovementVerdict::Reject(CheatReason::InputOutOfRange)
        }
    }

    /// Check that `proposed` is reachable from the last accepted position
    /// within the frames elapsed. The first observation of a player always
    /// passes and seeds the history.
    pub fn check_movement_budget(
        &self,
        player_id: &str,
        frame: u64,
        proposed: Position,
    ) -> MovementVerdict {
        if !proposed.x.is_finite() || !proposed.z.is_finite() {
            return MovementVerdict::Reject(CheatReason::NonFinitePosition);
        }

        match self.histories.entry(player_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(History {
                    last_x: proposed.x,
                    last_z: proposed.z,
                    last_frame: frame,
                });
                MovementVerdict::Accept
            }
            Entry::Occupied(mut slot) => {
                let history = slot.get_mut();

                let frame_delta = match frame.checked_sub(history.last_frame) {
                    Some(delta) if delta > 0 => delta,
                    _ => {
                        return MovementVerdict::Reject(CheatReason::StaleFrame {
                            last_frame: history.last_frame,
                            frame,
                        })
                    }
                };
                if frame_delta > self.max_frame_desync {
                    return MovementVerdict::Reject(CheatReason::FrameDesync { frame_delta });
                }

                let dx = proposed.x - history.last_x;
                let dz = proposed.z - history.last_z;
                let distance = (dx * dx + dz * dz).sqrt();
                let allowed =
                    self.max_speed * frame_delta as f32 / self.tick_rate + self.teleport_epsilon;

                if distance > allowed {
                    return MovementVerdict::Reject(CheatReason::SpeedExceeded { distance, allowed });
                }

                history.last_x = proposed.x;
                history.last_z = proposed.z;
                history.last_frame = frame;
                MovementVerdict::Accept
            }
        }
    }

    /// Detection side channel. Logs and counts; never feeds back into
    /// the accept/reject decision.
    pub fn on_cheat_detected(&self, player_id: &str, reason: CheatReason) {
        let mut strikes = self.strikes.entry(player_id.to_string()).or_insert(0);
        *strikes += 1;
        warn!(
            player_id = %player_id,
            reason = reason.code(),
            detail = ?reason,
            strikes = *strikes,
            "Anti-cheat flagged player"
        );
    }

    /// Number of detections recorded for a player
    pub fn strikes(&self, player_id: &str) -> u32 {
        self.strikes.get(player_id).map(|s| *s).unwrap_or(0)
    }

    /// Last accepted frame for a player, if one was observed
    pub fn last_frame(&self, player_id: &str) -> Option<u64> {
        self.histories.get(player_id).map(|h| h.last_frame)
    }

    /// Drop everything known about a player whose connection ended
    pub fn forget(&self, player_id: &str) {
        self.histories.remove(player_id);
        self.strikes.remove(player_id);
    }
}
