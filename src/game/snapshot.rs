//! Snapshot building and delivery accounting

use std::collections::HashMap;

use crate::ws::protocol::{ServerMsg, StateSnapshot};

use super::{InterestManager, PlayerState};

/// Builds per-observer snapshots and the full-world replay snapshot
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every player's position, used for replay recording
    pub fn world(players: &HashMap<String, PlayerState>) -> StateSnapshot {
        players
            .iter()
            .map(|(id, p)| (id.clone(), p.position()))
            .collect()
    }

    /// Snapshot message filtered for one observer
    pub fn for_observer(
        &self,
        frame: u64,
        observer_id: &str,
        interest: &InterestManager,
        players: &HashMap<String, PlayerState>,
    ) -> ServerMsg {
        ServerMsg::Snapshot {
            frame,
            state: interest.compute_visible(observer_id, players),
        }
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SnapshotStats {
        &mut self.stats
    }
}

/// Snapshot delivery counters for one shard
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    pub sent: u64,
    /// Outbound channel was full; the client missed this frame
    pub dropped_full: u64,
    /// Connection already closed
    pub skipped_closed: u64,
}
