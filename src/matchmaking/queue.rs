//! Matchmaking queue implementation

use std::time::{Duration, Instant};

use crate::config::MatchStrategy;
use crate::ws::{ConnectionId, PlayerConnection};

/// Player waiting in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub connection: PlayerConnection,
    pub player_id: String,
    /// Rating estimate taken at enqueue time
    pub rating: i32,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(connection: PlayerConnection, player_id: String, rating: i32) -> Self {
        Self {
            connection,
            player_id,
            rating,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// The matchmaking queue
pub struct MatchmakingQueue {
    queue: Vec<QueuedPlayer>,
    /// Players per match
    match_size: usize,
    /// Largest allowed rating spread inside one match
    mmr_range: i32,
    strategy: MatchStrategy,
}

impl MatchmakingQueue {
    pub fn new(match_size: usize, mmr_range: i32, strategy: MatchStrategy) -> Self {
        Self {
            queue: Vec::new(),
            match_size: match_size.max(1),
            mmr_range,
            strategy,
        }
    }

    /// Add a player to the queue
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        // Same connection rejoining replaces its entry
        self.queue
            .retain(|p| p.connection.id != player.connection.id);
        self.queue.push(player);
    }

    /// Remove a still-queued connection
    pub fn remove_by_connection(&mut self, connection: ConnectionId) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.connection.id == connection)?;
        Some(self.queue.remove(pos))
    }

    /// Connection queued under `player_id`, if any
    pub fn connection_of(&self, player_id: &str) -> Option<ConnectionId> {
        self.queue
            .iter()
            .find(|p| p.player_id == player_id)
            .map(|p| p.connection.id)
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.queue.iter().any(|p| p.connection.id == connection)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Try to form one match. Sorts by rating (stable, so equal ratings keep
    /// arrival order) and takes the first window of `match_size` players
    /// whose spread fits `mmr_range`, or the tightest such window.
    /// Returns None and leaves the queue untouched if no window fits.
    pub fn try_form_match(&mut self) -> Option<Vec<QueuedPlayer>> {
        let n = self.match_size;
        if self.queue.len() < n {
            return None;
        }

        self.queue.sort_by_key(|p| p.rating);

        let spreads = self
            .queue
            .windows(n)
            .map(|w| w[n - 1].rating - w[0].rating)
            .enumerate()
            .filter(|&(_, spread)| spread <= self.mmr_range);

        let start = match self.strategy {
            MatchStrategy::FirstFit => spreads.map(|(i, _)| i).next(),
            // min_by_key keeps the first of equal minima
            MatchStrategy::TightestFit => spreads.min_by_key(|&(_, spread)| spread).map(|(i, _)| i),
        }?;

        Some(self.queue.drain(start..start + n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn player(id: &str, rating: i32) -> QueuedPlayer {
        let (tx, _rx) = mpsc::channel(1);
        QueuedPlayer::new(PlayerConnection::new(tx), id.to_string(), rating)
    }

    fn ids(players: &[QueuedPlayer]) -> Vec<&str> {
        players.iter().map(|p| p.player_id.as_str()).collect()
    }

    #[test]
    fn nothing_forms_below_match_size() {
        let mut q = MatchmakingQueue::new(2, 200, MatchStrategy::FirstFit);
        q.enqueue(player("a", 1000));
        assert!(q.try_form_match().is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn two_close_ratings_form_a_match() {
        let mut q = MatchmakingQueue::new(2, 200, MatchStrategy::FirstFit);
        q.enqueue(player("a", 980));
        q.enqueue(player("b", 1010));
        let formed = q.try_form_match().unwrap();
        assert_eq!(ids(&formed), vec!["a", "b"]);
        assert!(q.is_empty());
    }

    #[test]
    fn band_is_inclusive_and_exceeding_it_waits() {
        let mut q = MatchmakingQueue::new(2, 200, MatchStrategy::FirstFit);
        q.enqueue(player("a", 1000));
        q.enqueue(player("b", 1201));
        assert!(q.try_form_match().is_none());
        assert_eq!(q.len(), 2);

        q.enqueue(player("c", 1200));
        let formed = q.try_form_match().unwrap();
        assert_eq!(ids(&formed), vec!["a", "c"]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn first_fit_takes_lowest_window() {
        let mut q = MatchmakingQueue::new(2, 200, MatchStrategy::FirstFit);
        q.enqueue(player("hi1", 2000));
        q.enqueue(player("lo1", 1000));
        q.enqueue(player("hi2", 2001));
        q.enqueue(player("lo2", 1150));
        let formed = q.try_form_match().unwrap();
        assert_eq!(ids(&formed), vec!["lo1", "lo2"]);
        // At most one match per attempt
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn tightest_fit_takes_smallest_spread() {
        let mut q = MatchmakingQueue::new(2, 200, MatchStrategy::TightestFit);
        q.enqueue(player("lo1", 1000));
        q.enqueue(player("lo2", 1150));
        q.enqueue(player("hi1", 2000));
        q.enqueue(player("hi2", 2001));
        let formed = q.try_form_match().unwrap();
        assert_eq!(ids(&formed), vec!["hi1", "hi2"]);
    }

    #[test]
    fn every_formed_group_respects_the_band() {
        let mut q = MatchmakingQueue::new(3, 100, MatchStrategy::FirstFit);
        for (i, rating) in [920, 1400, 950, 1010, 1450, 1500, 2000].iter().enumerate() {
            q.enqueue(player(&format!("p{}", i), *rating));
        }
        while let Some(group) = q.try_form_match() {
            assert_eq!(group.len(), 3);
            let min = group.iter().map(|p| p.rating).min().unwrap();
            let max = group.iter().map(|p| p.rating).max().unwrap();
            assert!(max - min <= 100);
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn rejoin_replaces_entry_and_removal_is_idempotent() {
        let mut q = MatchmakingQueue::new(2, 200, MatchStrategy::FirstFit);
        let first = player("a", 1000);
        let conn = first.connection.clone();
        q.enqueue(first);
        q.enqueue(QueuedPlayer::new(conn.clone(), "a".into(), 1000));
        assert_eq!(q.len(), 1);
        assert!(q.contains(conn.id));
        assert_eq!(q.connection_of("a"), Some(conn.id));

        assert!(q.remove_by_connection(conn.id).is_some());
        assert!(q.remove_by_connection(conn.id).is_none());
        assert!(q.is_empty());
    }
}
