//! Bounded per-shard replay recording

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::config::ReplayConfig;
use crate::ws::protocol::{ReplayFrame, StateSnapshot};

#[derive(Default)]
struct Recordings {
    frames: HashMap<String, VecDeque<ReplayFrame>>,
    /// Shard ids in first-recorded order
    order: VecDeque<String>,
}

/// Frame history of every shard, capped per shard and in shard count.
/// Stopped shards keep their recording until cleared or pushed out by
/// newer shards.
pub struct ReplayStore {
    max_frames: usize,
    max_shards: usize,
    shards: Mutex<Recordings>,
}

impl ReplayStore {
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            max_frames: config.max_frames.max(1),
            max_shards: config.max_shards.max(1),
            shards: Mutex::new(Recordings::default()),
        }
    }

    /// Append a frame, evicting the oldest beyond the cap. A shard's first
    /// frame may evict the oldest recorded shard.
    pub fn record(&self, shard_id: &str, frame: u64, state: StateSnapshot) {
        let mut guard = self.shards.lock();
        let rec = &mut *guard;
        if !rec.frames.contains_key(shard_id) {
            while rec.order.len() >= self.max_shards {
                let Some(oldest) = rec.order.pop_front() else { break };
                rec.frames.remove(&oldest);
                debug!(shard_id = %oldest, "Evicted oldest replay");
            }
            rec.order.push_back(shard_id.to_string());
        }
        let frames = rec.frames.entry(shard_id.to_string()).or_default();
        frames.push_back(ReplayFrame { frame, state });
        while frames.len() > self.max_frames {
            frames.pop_front();
        }
    }

    /// Owned copy of the recorded frames, oldest first
    pub fn get(&self, shard_id: &str) -> Option<Vec<ReplayFrame>> {
        self.shards
            .lock()
            .frames
            .get(shard_id)
            .map(|frames| frames.iter().cloned().collect())
    }

    pub fn clear(&self, shard_id: &str) -> bool {
        let mut rec = self.shards.lock();
        rec.order.retain(|id| id != shard_id);
        rec.frames.remove(shard_id).is_some()
    }

    /// Number of shards with recorded frames
    pub fn shard_count(&self) -> usize {
        self.shards.lock().frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::Position;

    fn snapshot(x: f32) -> StateSnapshot {
        let mut state = StateSnapshot::new();
        state.insert("p".to_string(), Position { x, z: 0.0 });
        state
    }

    #[test]
    fn unknown_shard_is_absent() {
        let store = ReplayStore::new(&ReplayConfig::default());
        assert!(store.get("nope").is_none());
        assert!(!store.clear("nope"));
    }

    #[test]
    fn cap_evicts_oldest_first() {
        let store = ReplayStore::new(&ReplayConfig {
            max_frames: 3,
            ..ReplayConfig::default()
        });
        for frame in 0..5 {
            store.record("s", frame, snapshot(frame as f32));
        }
        let frames = store.get("s").unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.iter().map(|f| f.frame).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(frames[0].state["p"].x, 2.0);
    }

    #[test]
    fn shards_are_independent_and_clearable() {
        let store = ReplayStore::new(&ReplayConfig {
            max_frames: 2,
            ..ReplayConfig::default()
        });
        store.record("a", 0, snapshot(0.0));
        store.record("b", 0, snapshot(1.0));
        assert_eq!(store.shard_count(), 2);
        assert!(store.clear("a"));
        assert!(store.get("a").is_none());
        assert_eq!(store.get("b").unwrap().len(), 1);
        assert_eq!(store.shard_count(), 1);
    }

    #[test]
    fn oldest_shard_is_dropped_past_the_shard_cap() {
        let store = ReplayStore::new(&ReplayConfig {
            max_frames: 10,
            max_shards: 2,
        });
        store.record("a", 0, snapshot(0.0));
        store.record("b", 0, snapshot(0.0));
        // Further frames of a known shard never evict
        store.record("a", 1, snapshot(1.0));
        assert_eq!(store.shard_count(), 2);

        store.record("c", 0, snapshot(0.0));
        assert_eq!(store.shard_count(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());

        // A cleared slot is reusable without evicting anyone
        assert!(store.clear("b"));
        store.record("d", 0, snapshot(0.0));
        assert!(store.get("c").is_some());
        assert_eq!(store.shard_count(), 2);
    }
}
