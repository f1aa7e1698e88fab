//! In-memory stores shared across shards and routes

pub mod ladder;
pub mod replay;

pub use ladder::{Ladder, LadderEntry, LadderError, Outcome};
pub use replay::ReplayStore;
