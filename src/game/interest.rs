//! Area-of-interest filtering
//!
//! Linear scan per observer, so a full shard broadcast is O(n²). Fine at
//! the per-shard player cap; a spatial index would replace the scan for
//! larger worlds without changing the signature.

use std::collections::HashMap;

use crate::config::InterestConfig;
use crate::ws::protocol::StateSnapshot;

use super::PlayerState;

#[derive(Debug, Clone)]
pub struct InterestManager {
    radius_sq: f32,
}

impl InterestManager {
    pub fn new(config: &InterestConfig) -> Self {
        Self {
            radius_sq: config.aoi_radius * config.aoi_radius,
        }
    }

    /// Visible subset of `players` for `observer_id`: the observer itself
    /// plus everyone within the radius. Empty if the observer is unknown.
    pub fn compute_visible(
        &self,
        observer_id: &str,
        players: &HashMap<String, PlayerState>,
    ) -> StateSnapshot {
        let Some(observer) = players.get(observer_id) else {
            return StateSnapshot::new();
        };

        players
            .iter()
            .filter(|(id, subject)| id.as_str() == observer_id || self.in_range(observer, subject))
            .map(|(id, subject)| (id.clone(), subject.position()))
            .collect()
    }

    fn in_range(&self, a: &PlayerState, b: &PlayerState) -> bool {
        let dx = a.x - b.x;
        let dz = a.z - b.z;
        dx * dx + dz * dz <= self.radius_sq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(x: f32, z: f32) -> PlayerState {
        PlayerState { x, z, vx: 0.0, vz: 0.0 }
    }

    fn manager() -> InterestManager {
        InterestManager::new(&InterestConfig { aoi_radius: 40.0 })
    }

    #[test]
    fn observer_always_sees_itself() {
        let mut players = HashMap::new();
        players.insert("me".to_string(), player(1000.0, -1000.0));
        let visible = manager().compute_visible("me", &players);
        assert_eq!(visible.len(), 1);
        assert!(visible.contains_key("me"));
    }

    #[test]
    fn boundary_is_inclusive() {
        let mut players = HashMap::new();
        players.insert("me".to_string(), player(0.0, 0.0));
        players.insert("edge".to_string(), player(40.0, 0.0));
        players.insert("diag".to_string(), player(24.0, 32.0));
        players.insert("far".to_string(), player(40.01, 0.0));
        let visible = manager().compute_visible("me", &players);
        assert!(visible.contains_key("edge"));
        assert!(visible.contains_key("diag"));
        assert!(!visible.contains_key("far"));
        assert_eq!(visible.len(), 3);
    }

    #[test]
    fn visibility_is_relative_to_each_observer() {
        let mut players = HashMap::new();
        players.insert("a".to_string(), player(0.0, 0.0));
        players.insert("b".to_string(), player(30.0, 0.0));
        players.insert("c".to_string(), player(60.0, 0.0));
        let m = manager();
        assert_eq!(m.compute_visible("a", &players).len(), 2);
        assert_eq!(m.compute_visible("b", &players).len(), 3);
        assert!(!m.compute_visible("c", &players).contains_key("a"));
    }

    #[test]
    fn unknown_observer_sees_nothing() {
        let mut players = HashMap::new();
        players.insert("a".to_string(), player(0.0, 0.0));
        assert!(manager().compute_visible("ghost", &players).is_empty());
    }
}
