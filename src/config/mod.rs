//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// World and simulation limits shared by every shard
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Half-extent of the square world on each axis
    pub world_size: f32,
    /// Maximum movement speed in world units per second
    pub max_speed: f32,
    /// Hard cap on players in one shard
    pub max_players_per_shard: usize,
    /// How far ahead of the current frame buffered input may be
    pub input_max_future_frames: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            world_size: 1024.0,
            max_speed: 6.0,
            max_players_per_shard: 64,
            input_max_future_frames: 120,
        }
    }
}

/// How the matchmaker picks a window out of the rating-sorted queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchStrategy {
    /// First window from the lowest rating whose spread fits the tolerance
    FirstFit,
    /// Window with the smallest spread that fits the tolerance
    TightestFit,
}

impl FromStr for MatchStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_fit" => Ok(Self::FirstFit),
            "tightest_fit" => Ok(Self::TightestFit),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MatchmakingConfig {
    /// Players per match
    pub match_size: usize,
    /// Maximum rating spread inside one match
    pub mmr_range: i32,
    pub strategy: MatchStrategy,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            match_size: 2,
            mmr_range: 200,
            strategy: MatchStrategy::FirstFit,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AntiCheatConfig {
    /// Largest accepted gap between two observed frames
    pub max_frame_desync: u64,
    /// Slack added to the distance budget for float rounding
    pub teleport_epsilon: f32,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            max_frame_desync: 12,
            teleport_epsilon: 0.01,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InterestConfig {
    /// Area-of-interest radius in world units
    pub aoi_radius: f32,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self { aoi_radius: 40.0 }
    }
}

#[derive(Clone, Debug)]
pub struct LadderConfig {
    pub default_rating: i32,
    pub min_rating: i32,
    pub max_rating: i32,
    pub k_factor: f64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            default_rating: 1000,
            min_rating: 100,
            max_rating: 5000,
            k_factor: 32.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Frames kept per shard before the oldest is evicted
    pub max_frames: usize,
    /// Shards kept before the oldest recording is dropped
    pub max_shards: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            // 10 minutes at 60 ticks per second
            max_frames: 60 * 60 * 10,
            max_shards: 64,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Inbound message ceiling per connection
    pub max_msgs_per_sec: u32,
    /// Largest accepted text frame
    pub max_payload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_msgs_per_sec: 120,
            max_payload_bytes: 1024,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub world: WorldConfig,
    pub matchmaking: MatchmakingConfig,
    pub anti_cheat: AntiCheatConfig,
    pub interest: InterestConfig,
    pub ladder: LadderConfig,
    pub replay: ReplayConfig,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            world: WorldConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            anti_cheat: AntiCheatConfig::default(),
            interest: InterestConfig::default(),
            ladder: LadderConfig::default(),
            replay: ReplayConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| defaults.server_addr.to_string()),
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),

            world: WorldConfig {
                tick_rate: parse_or(&lookup, "TICK_RATE", defaults.world.tick_rate)?,
                world_size: parse_or(&lookup, "WORLD_SIZE", defaults.world.world_size)?,
                max_speed: parse_or(&lookup, "MAX_SPEED", defaults.world.max_speed)?,
                max_players_per_shard: parse_or(
                    &lookup,
                    "MAX_PLAYERS_PER_SHARD",
                    defaults.world.max_players_per_shard,
                )?,
                input_max_future_frames: parse_or(
                    &lookup,
                    "INPUT_MAX_FUTURE_FRAMES",
                    defaults.world.input_max_future_frames,
                )?,
            },

            matchmaking: MatchmakingConfig {
                match_size: parse_or(&lookup, "MATCH_SIZE", defaults.matchmaking.match_size)?,
                mmr_range: parse_or(&lookup, "MMR_RANGE", defaults.matchmaking.mmr_range)?,
                strategy: match lookup("MATCH_STRATEGY") {
                    Some(raw) => raw
                        .parse()
                        .map_err(|_| ConfigError::Invalid("MATCH_STRATEGY"))?,
                    None => defaults.matchmaking.strategy,
                },
            },

            anti_cheat: AntiCheatConfig {
                max_frame_desync: parse_or(
                    &lookup,
                    "MAX_FRAME_DESYNC",
                    defaults.anti_cheat.max_frame_desync,
                )?,
                teleport_epsilon: parse_or(
                    &lookup,
                    "TELEPORT_EPSILON",
                    defaults.anti_cheat.teleport_epsilon,
                )?,
            },

            interest: InterestConfig {
                aoi_radius: parse_or(&lookup, "AOI_RADIUS", defaults.interest.aoi_radius)?,
            },

            ladder: LadderConfig {
                default_rating: parse_or(&lookup, "DEFAULT_MMR", defaults.ladder.default_rating)?,
                min_rating: parse_or(&lookup, "MIN_MMR", defaults.ladder.min_rating)?,
                max_rating: parse_or(&lookup, "MAX_MMR", defaults.ladder.max_rating)?,
                k_factor: parse_or(&lookup, "K_FACTOR", defaults.ladder.k_factor)?,
            },

            replay: ReplayConfig {
                max_frames: parse_or(&lookup, "MAX_REPLAY_FRAMES", defaults.replay.max_frames)?,
                max_shards: parse_or(&lookup, "MAX_REPLAY_SHARDS", defaults.replay.max_shards)?,
            },

            gateway: GatewayConfig {
                max_msgs_per_sec: parse_or(
                    &lookup,
                    "MAX_MSGS_PER_SEC",
                    defaults.gateway.max_msgs_per_sec,
                )?,
                max_payload_bytes: parse_or(
                    &lookup,
                    "MAX_PAYLOAD_BYTES",
                    defaults.gateway.max_payload_bytes,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world.tick_rate == 0 {
            return Err(ConfigError::Inconsistent("TICK_RATE must be positive"));
        }
        if !(self.world.world_size > 0.0) || !(self.world.max_speed > 0.0) {
            return Err(ConfigError::Inconsistent(
                "WORLD_SIZE and MAX_SPEED must be positive",
            ));
        }
        if !(self.interest.aoi_radius >= 0.0) {
            return Err(ConfigError::Inconsistent("AOI_RADIUS must not be negative"));
        }
        if self.matchmaking.match_size < 2 {
            return Err(ConfigError::Inconsistent("MATCH_SIZE must be at least 2"));
        }
        if self.matchmaking.match_size > self.world.max_players_per_shard {
            return Err(ConfigError::Inconsistent(
                "MATCH_SIZE exceeds MAX_PLAYERS_PER_SHARD",
            ));
        }
        let ladder = &self.ladder;
        if ladder.min_rating > ladder.default_rating || ladder.default_rating > ladder.max_rating {
            return Err(ConfigError::Inconsistent(
                "DEFAULT_MMR must lie within MIN_MMR..=MAX_MMR",
            ));
        }
        if self.replay.max_frames == 0 {
            return Err(ConfigError::Inconsistent("MAX_REPLAY_FRAMES must be positive"));
        }
        if self.replay.max_shards == 0 {
            return Err(ConfigError::Inconsistent("MAX_REPLAY_SHARDS must be positive"));
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(&'static str),
}
