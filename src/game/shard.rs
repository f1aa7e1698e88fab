//! Shard state and authoritative tick loop
//!
//! One shard owns one match. Its task is the only code that touches the
//! world state; the network path reaches it through `ShardCommand`s that
//! are drained at the start of every tick.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::util::time::{tick_period, Timer};
use crate::ws::protocol::{validate_state, Position};
use crate::ws::{ConnectionId, Delivery, PlayerConnection};

use super::physics::PhysicsSystem;
use super::snapshot::SnapshotBuilder;
use super::{InputSample, MovementVerdict, SimulationContext};

const COMMAND_BUFFER: usize = 256;

/// Shard lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPhase {
    Created,
    Running,
    Stopped,
}

/// Player state in a shard (authoritative)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerState {
    pub x: f32,
    pub z: f32,
    pub vx: f32,
    pub vz: f32,
}

impl PlayerState {
    pub fn position(&self) -> Position {
        Position {
            x: self.x,
            z: self.z,
        }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.z.is_finite() && self.vx.is_finite() && self.vz.is_finite()
    }
}

/// Messages from the network path into a shard task
#[derive(Debug, Clone)]
pub enum ShardCommand {
    Input {
        player_id: String,
        sample: InputSample,
    },
    Leave {
        player_id: String,
    },
    Stop,
}

/// Handle to a running shard
#[derive(Clone)]
pub struct ShardHandle {
    pub id: String,
    command_tx: mpsc::Sender<ShardCommand>,
    player_count: Arc<AtomicUsize>,
}

impl ShardHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Forward one input sample; returns false if the shard could not take it
    pub fn send_input(&self, player_id: &str, sample: InputSample) -> bool {
        self.command_tx
            .try_send(ShardCommand::Input {
                player_id: player_id.to_string(),
                sample,
            })
            .is_ok()
    }

    pub async fn leave(&self, player_id: &str) {
        let _ = self
            .command_tx
            .send(ShardCommand::Leave {
                player_id: player_id.to_string(),
            })
            .await;
    }

    pub async fn stop(&self) {
        let _ = self.command_tx.send(ShardCommand::Stop).await;
    }
}

#[derive(Debug, Clone)]
struct Assignment {
    shard_id: String,
    player_id: String,
}

/// Registry of all live shards and of which connection plays in which
pub struct ShardRegistry {
    shards: DashMap<String, ShardHandle>,
    assignments: DashMap<ConnectionId, Assignment>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            assignments: DashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<ShardHandle> {
        self.shards.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: ShardHandle) {
        self.shards.insert(handle.id.clone(), handle);
    }

    pub fn remove(&self, id: &str) -> Option<ShardHandle> {
        self.shards.remove(id).map(|(_, h)| h)
    }

    pub fn active_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn total_players(&self) -> usize {
        self.shards.iter().map(|s| s.value().player_count()).sum()
    }

    /// Bind a connection to the shard that now owns its player
    pub fn assign(&self, connection: ConnectionId, shard_id: &str, player_id: &str) {
        self.assignments.insert(
            connection,
            Assignment {
                shard_id: shard_id.to_string(),
                player_id: player_id.to_string(),
            },
        );
    }

    /// Whether the connection was ever placed in a shard. Stays true until
    /// the connection detaches, even if the shard stopped meanwhile.
    pub fn is_assigned(&self, connection: ConnectionId) -> bool {
        self.assignments.contains_key(&connection)
    }

    /// Connection currently playing as `player_id`, if any
    pub fn connection_of(&self, player_id: &str) -> Option<ConnectionId> {
        self.assignments
            .iter()
            .find(|a| a.value().player_id == player_id)
            .map(|a| *a.key())
    }

    /// Shard id a connection is bound to
    pub fn shard_of(&self, connection: ConnectionId) -> Option<String> {
        self.assignments
            .get(&connection)
            .map(|a| a.shard_id.clone())
    }

    /// Route an already validated input sample to the connection's shard
    pub fn route_input(&self, connection: ConnectionId, sample: InputSample) -> bool {
        let Some(assignment) = self.assignments.get(&connection).map(|a| a.value().clone()) else {
            return false;
        };
        match self.get(&assignment.shard_id) {
            Some(handle) => handle.send_input(&assignment.player_id, sample),
            None => false,
        }
    }

    /// Unbind a closing connection and tell its shard the player left
    pub async fn detach(&self, connection: ConnectionId) -> Option<String> {
        let (_, assignment) = self.assignments.remove(&connection)?;
        if let Some(handle) = self.get(&assignment.shard_id) {
            handle.leave(&assignment.player_id).await;
        }
        Some(assignment.shard_id)
    }
}

impl ShardRegistry {
    /// Ask every live shard to stop
    pub async fn stop_all(&self) {
        let handles: Vec<ShardHandle> = self.shards.iter().map(|s| s.value().clone()).collect();
        for handle in handles {
            handle.stop().await;
        }
    }
}

impl Default for ShardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Failures isolated to one player inside one tick
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("player {0} has no state in this shard")]
    UnknownPlayer(String),

    #[error("player {player_id} has non-finite state {state:?}")]
    CorruptState {
        player_id: String,
        state: PlayerState,
    },
}

/// The authoritative simulation of one match
pub struct Shard {
    id: String,
    phase: ShardPhase,
    frame: u64,
    players: HashMap<String, PlayerState>,
    connections: HashMap<String, PlayerConnection>,
    pending_input: HashMap<String, BTreeMap<u64, InputSample>>,
    ctx: SimulationContext,
    snapshots: SnapshotBuilder,
    command_rx: mpsc::Receiver<ShardCommand>,
    registry: Arc<ShardRegistry>,
    player_count: Arc<AtomicUsize>,
}

impl Shard {
    /// Create a shard for a roster; every player spawns at the origin
    pub fn new(
        id: String,
        roster: Vec<(String, PlayerConnection)>,
        ctx: SimulationContext,
        registry: Arc<ShardRegistry>,
    ) -> (Self, ShardHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let player_count = Arc::new(AtomicUsize::new(roster.len()));

        let mut players = HashMap::with_capacity(roster.len());
        let mut connections = HashMap::with_capacity(roster.len());
        let mut pending_input = HashMap::with_capacity(roster.len());
        for (player_id, connection) in roster {
            if players.contains_key(&player_id) {
                warn!(shard_id = %id, player_id = %player_id, "Duplicate player id in roster, keeping the first");
                continue;
            }
            players.insert(player_id.clone(), PlayerState::default());
            pending_input.insert(player_id.clone(), BTreeMap::new());
            connections.insert(player_id, connection);
        }
        player_count.store(players.len(), Ordering::Relaxed);

        let handle = ShardHandle {
            id: id.clone(),
            command_tx,
            player_count: player_count.clone(),
        };

        let shard = Self {
            id,
            phase: ShardPhase::Created,
            frame: 0,
            players,
            connections,
            pending_input,
            ctx,
            snapshots: SnapshotBuilder::new(),
            command_rx,
            registry,
            player_count,
        };

        (shard, handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> ShardPhase {
        self.phase
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerState> {
        self.players.get(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Spawn the recurring tick on the runtime
    pub fn start(mut self) -> JoinHandle<()> {
        self.phase = ShardPhase::Running;
        info!(
            shard_id = %self.id,
            player_count = self.players.len(),
            tick_rate = self.ctx.world.tick_rate,
            "Shard started"
        );
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut tick_interval = interval(tick_period(self.ctx.world.tick_rate));
        // A late timer skips ahead instead of bursting; ticks never overlap
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            self.drain_commands();
            if self.phase == ShardPhase::Stopped {
                break;
            }

            self.tick();
        }

        let stats = self.snapshots.stats();
        info!(
            shard_id = %self.id,
            frames = self.frame,
            snapshots_sent = stats.sent,
            snapshots_dropped = stats.dropped_full,
            "Shard task finished"
        );
    }

    /// Apply everything the network path queued since the last tick
    fn drain_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(ShardCommand::Input { player_id, sample }) => {
                    self.buffer_input(&player_id, sample);
                }
                Ok(ShardCommand::Leave { player_id }) => {
                    self.remove_player(&player_id);
                }
                Ok(ShardCommand::Stop) => {
                    self.stop();
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.stop();
                    break;
                }
            }
            if self.phase == ShardPhase::Stopped {
                break;
            }
        }
    }

    /// Store a sample under its declared frame, replacing any earlier one.
    /// Samples for frames already simulated or too far ahead are dropped.
    pub fn buffer_input(&mut self, player_id: &str, sample: InputSample) -> bool {
        let Some(buffer) = self.pending_input.get_mut(player_id) else {
            return false;
        };

        if sample.frame < self.frame {
            debug!(shard_id = %self.id, player_id = %player_id, frame = sample.frame, current = self.frame, "Dropping stale input");
            return false;
        }
        let horizon = self.frame + self.ctx.world.input_max_future_frames;
        if sample.frame > horizon {
            debug!(shard_id = %self.id, player_id = %player_id, frame = sample.frame, horizon, "Dropping input too far ahead");
            return false;
        }

        buffer.insert(sample.frame, sample);
        true
    }

    /// Run one simulation step for the current frame
    pub fn tick(&mut self) {
        if self.phase == ShardPhase::Stopped {
            return;
        }

        let timer = Timer::new();
        let frame = self.frame;

        let mut player_ids: Vec<String> = self.players.keys().cloned().collect();
        player_ids.sort_unstable();

        for player_id in &player_ids {
            if let Err(e) = self.step_player(player_id, frame) {
                warn!(shard_id = %self.id, frame, error = %e, "Skipping player for this frame");
            }
        }

        self.broadcast(frame);

        let world_state = SnapshotBuilder::world(&self.players);
        if !validate_state(&world_state, self.ctx.world.world_size) {
            warn!(shard_id = %self.id, frame, "World state failed sanity check");
        }
        self.ctx.replays.record(&self.id, frame, world_state);

        self.evict_stale_input(frame + 1);
        self.frame += 1;

        let elapsed = timer.elapsed();
        if elapsed > tick_period(self.ctx.world.tick_rate) {
            warn!(shard_id = %self.id, frame, elapsed_us = elapsed.as_micros() as u64, "Tick overran its period");
        }
    }

    /// Input resolution, anti-cheat gate, integration and clamp for one player
    fn step_player(&mut self, player_id: &str, frame: u64) -> Result<(), TickError> {
        let sample = self
            .pending_input
            .get_mut(player_id)
            .and_then(|buffer| buffer.remove(&frame))
            .unwrap_or_else(|| InputSample::idle(frame));

        let current = *self
            .players
            .get(player_id)
            .ok_or_else(|| TickError::UnknownPlayer(player_id.to_string()))?;
        if !current.is_finite() {
            return Err(TickError::CorruptState {
                player_id: player_id.to_string(),
                state: current,
            });
        }

        let anti_cheat = &self.ctx.anti_cheat;
        if let MovementVerdict::Reject(reason) = anti_cheat.validate_input_range(&sample) {
            anti_cheat.on_cheat_detected(player_id, reason);
            return Ok(());
        }

        let proposed = PhysicsSystem::step(&current, &sample, &self.ctx.world);

        match anti_cheat.check_movement_budget(player_id, frame, proposed.position()) {
            MovementVerdict::Accept => {
                if let Some(state) = self.players.get_mut(player_id) {
                    *state = proposed;
                }
            }
            MovementVerdict::Reject(reason) => anti_cheat.on_cheat_detected(player_id, reason),
        }

        Ok(())
    }

    /// Send each open connection its filtered view of this frame
    fn broadcast(&mut self, frame: u64) {
        for (player_id, connection) in &self.connections {
            if !connection.is_open() {
                self.snapshots.stats_mut().skipped_closed += 1;
                continue;
            }

            let msg = self
                .snapshots
                .for_observer(frame, player_id, &self.ctx.interest, &self.players);

            match connection.send(msg) {
                Delivery::Sent => self.snapshots.stats_mut().sent += 1,
                Delivery::Full => {
                    self.snapshots.stats_mut().dropped_full += 1;
                    debug!(shard_id = %self.id, player_id = %player_id, frame, "Outbound queue full, snapshot dropped");
                }
                Delivery::Closed => self.snapshots.stats_mut().skipped_closed += 1,
            }
        }
    }

    fn evict_stale_input(&mut self, next_frame: u64) {
        for buffer in self.pending_input.values_mut() {
            *buffer = buffer.split_off(&next_frame);
        }
    }

    /// Player departure; an emptied shard stops itself
    pub fn remove_player(&mut self, player_id: &str) {
        let removed = self.players.remove(player_id).is_some();
        self.connections.remove(player_id);
        self.pending_input.remove(player_id);
        self.player_count.store(self.players.len(), Ordering::Relaxed);

        if removed {
            // Departure ends the player's connected lifetime
            self.ctx.anti_cheat.forget(player_id);
            info!(
                shard_id = %self.id,
                player_id = %player_id,
                remaining = self.players.len(),
                "Player left shard"
            );
        }

        if self.players.is_empty() {
            self.stop();
        }
    }

    /// Cancel the tick and drop out of the live registry
    pub fn stop(&mut self) {
        if self.phase == ShardPhase::Stopped {
            return;
        }
        self.phase = ShardPhase::Stopped;
        self.registry.remove(&self.id);
        info!(shard_id = %self.id, frame = self.frame, "Shard stopped");
    }

    #[cfg(test)]
    fn pending_frames(&self, player_id: &str) -> Vec<u64> {
        self.pending_input
            .get(player_id)
            .map(|b| b.keys().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn overwrite_state(&mut self, player_id: &str, state: PlayerState) {
        self.players.insert(player_id.to_string(), state);
    }
}
