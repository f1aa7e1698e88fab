//! Player ratings ladder (Elo)

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use crate::config::LadderConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LadderError {
    #[error("winner and loser must be different players")]
    SamePlayer,

    #[error("player id must not be empty")]
    EmptyPlayerId,
}

/// One row of the leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LadderEntry {
    pub rank: usize,
    pub player_id: String,
    pub mmr: i32,
}

/// Ratings after one recorded result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub winner_mmr: i32,
    pub loser_mmr: i32,
}

/// In-memory rating table
pub struct Ladder {
    config: LadderConfig,
    ratings: Mutex<HashMap<String, i32>>,
}

impl Ladder {
    pub fn new(config: LadderConfig) -> Self {
        Self {
            config,
            ratings: Mutex::new(HashMap::new()),
        }
    }

    /// Current rating; a first lookup seeds the default
    pub fn get_rating(&self, player_id: &str) -> i32 {
        *self
            .ratings
            .lock()
            .entry(player_id.to_string())
            .or_insert(self.config.default_rating)
    }

    /// Apply one win/loss. Both ratings move under a single lock.
    pub fn record_outcome(&self, winner_id: &str, loser_id: &str) -> Result<Outcome, LadderError> {
        if winner_id.is_empty() || loser_id.is_empty() {
            return Err(LadderError::EmptyPlayerId);
        }
        if winner_id == loser_id {
            return Err(LadderError::SamePlayer);
        }

        let mut ratings = self.ratings.lock();
        let winner = *ratings
            .entry(winner_id.to_string())
            .or_insert(self.config.default_rating);
        let loser = *ratings
            .entry(loser_id.to_string())
            .or_insert(self.config.default_rating);

        let winner_mmr = self.adjust(winner, loser, 1.0);
        let loser_mmr = self.adjust(loser, winner, 0.0);
        ratings.insert(winner_id.to_string(), winner_mmr);
        ratings.insert(loser_id.to_string(), loser_mmr);
        drop(ratings);

        info!(
            winner_id = %winner_id,
            loser_id = %loser_id,
            winner_mmr,
            loser_mmr,
            "Recorded match outcome"
        );

        Ok(Outcome {
            winner_mmr,
            loser_mmr,
        })
    }

    /// Ranked by rating descending, ties broken by player id
    pub fn leaderboard(&self, limit: usize) -> Vec<LadderEntry> {
        let mut rows: Vec<(String, i32)> = self
            .ratings
            .lock()
            .iter()
            .map(|(id, mmr)| (id.clone(), *mmr))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        rows.into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (player_id, mmr))| LadderEntry {
                rank: i + 1,
                player_id,
                mmr,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ratings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.lock().is_empty()
    }

    fn adjust(&self, own: i32, opponent: i32, score: f64) -> i32 {
        let expected = 1.0 / (1.0 + 10f64.powf((opponent - own) as f64 / 400.0));
        let next = own as f64 + self.config.k_factor * (score - expected);
        let next = next.clamp(self.config.min_rating as f64, self.config.max_rating as f64);
        next.round() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn ladder() -> Ladder {
        Ladder::new(LadderConfig::default())
    }

    #[test]
    fn first_lookup_seeds_default() {
        let l = ladder();
        assert!(l.is_empty());
        assert_eq!(l.get_rating("new"), 1000);
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn even_match_moves_half_k() {
        let l = ladder();
        let outcome = assert_ok!(l.record_outcome("w", "l"));
        assert_eq!(outcome.winner_mmr, 1016);
        assert_eq!(outcome.loser_mmr, 984);
        assert_eq!(l.get_rating("w"), 1016);
        assert_eq!(l.get_rating("l"), 984);
    }

    #[test]
    fn upset_moves_more_than_expected_win() {
        let l = ladder();
        for _ in 0..10 {
            l.record_outcome("strong", "weak").unwrap();
        }
        let strong = l.get_rating("strong");
        let weak = l.get_rating("weak");
        let expected_gain = l.record_outcome("strong", "other").unwrap().winner_mmr - strong;
        let upset = l.record_outcome("weak", "strong").unwrap();
        assert!(upset.winner_mmr - weak > expected_gain);
    }

    #[test]
    fn ratings_stay_within_bounds() {
        let l = Ladder::new(LadderConfig {
            min_rating: 990,
            max_rating: 1010,
            ..LadderConfig::default()
        });
        let outcome = l.record_outcome("w", "l").unwrap();
        assert_eq!(outcome.winner_mmr, 1010);
        assert_eq!(outcome.loser_mmr, 990);
    }

    #[test]
    fn rejects_self_and_empty_results() {
        let l = ladder();
        assert_eq!(l.record_outcome("a", "a"), Err(LadderError::SamePlayer));
        assert_eq!(l.record_outcome("", "b"), Err(LadderError::EmptyPlayerId));
        assert_err!(l.record_outcome("a", ""));
        assert!(l.is_empty());
    }

    #[test]
    fn leaderboard_is_sorted_and_limited() {
        let l = ladder();
        l.record_outcome("b", "c").unwrap();
        l.get_rating("a");
        let board = l.leaderboard(2);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].player_id, "b");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].player_id, "a");
        assert_eq!(board[1].mmr, 1000);
    }
}
