//! Movement integration and world bounds

use crate::config::WorldConfig;

use super::{InputSample, PlayerState};

/// Physics system for stepping player positions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Scale a direction down to unit length if it is longer than one
    pub fn clamp_direction(dx: f32, dz: f32) -> (f32, f32) {
        let mag_sq = dx * dx + dz * dz;
        if mag_sq > 1.0 {
            let mag = mag_sq.sqrt();
            (dx / mag, dz / mag)
        } else {
            (dx, dz)
        }
    }

    /// Explicit Euler step at a fixed timestep, then clamp to the world
    pub fn step(state: &PlayerState, input: &InputSample, world: &WorldConfig) -> PlayerState {
        let (dx, dz) = Self::clamp_direction(input.dx, input.dz);
        let tick_rate = world.tick_rate as f32;

        let vx = dx * world.max_speed;
        let vz = dz * world.max_speed;

        PlayerState {
            x: Self::clamp_to_world(state.x + vx / tick_rate, world.world_size),
            z: Self::clamp_to_world(state.z + vz / tick_rate, world.world_size),
            vx,
            vz,
        }
    }

    pub fn clamp_to_world(v: f32, world_size: f32) -> f32 {
        v.clamp(-world_size, world_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> WorldConfig {
        WorldConfig::default()
    }

    #[test]
    fn unit_step_moves_max_speed_over_tick_rate() {
        let w = world();
        let next = PhysicsSystem::step(&PlayerState::default(), &InputSample { frame: 11, dx: 1.0, dz: 0.0 }, &w);
        assert!((next.x - w.max_speed / w.tick_rate as f32).abs() < 1e-6);
        assert_eq!(next.z, 0.0);
        assert_eq!(next.vx, w.max_speed);
    }

    #[test]
    fn diagonal_input_is_normalized() {
        let w = world();
        let next = PhysicsSystem::step(&PlayerState::default(), &InputSample { frame: 0, dx: 1.0, dz: 1.0 }, &w);
        let dist = (next.x * next.x + next.z * next.z).sqrt();
        assert!((dist - w.max_speed / w.tick_rate as f32).abs() < 1e-5);
    }

    #[test]
    fn idle_input_keeps_position_and_zeroes_velocity() {
        let start = PlayerState { x: 3.0, z: -4.0, vx: 6.0, vz: 0.0 };
        let next = PhysicsSystem::step(&start, &InputSample::idle(3), &world());
        assert_eq!((next.x, next.z, next.vx, next.vz), (3.0, -4.0, 0.0, 0.0));
    }

    #[test]
    fn position_is_clamped_per_axis() {
        let w = world();
        let edge = PlayerState { x: w.world_size, z: -w.world_size, vx: 0.0, vz: 0.0 };
        let next = PhysicsSystem::step(&edge, &InputSample { frame: 0, dx: 0.6, dz: -0.6 }, &w);
        assert_eq!(next.x, w.world_size);
        assert_eq!(next.z, -w.world_size);
    }
}
