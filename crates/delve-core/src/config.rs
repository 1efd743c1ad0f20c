//! Configuration types for the engine and the headless runner.

use serde::{Deserialize, Serialize};

/// World configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Width of the world in tiles
    pub width: i32,
    /// Depth of the world in tiles
    pub depth: i32,
    /// Edge length of one tile in world units
    pub tile_size: i32,
    /// Average row of the terrain surface
    pub surface_row: i32,
    /// Cave density (0.0 to 1.0)
    pub cave_density: f32,
    /// Chance per surface column of growing a tree
    pub tree_density: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 256,
            depth: 128,
            tile_size: 32,
            surface_row: 32,
            cave_density: 0.08,
            tree_density: 0.06,
        }
    }
}

/// Mob movement constants, all in world units per tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Fixed horizontal step while left/right is held
    pub move_step: f32,
    /// Downward acceleration
    pub gravity: f32,
    /// Terminal falling speed; must stay below one tile
    pub max_fall_speed: f32,
    /// Vertical velocity applied on jump (negative is up)
    pub jump_velocity: f32,
    /// Climbing speed on ladders
    pub ladder_speed: f32,
    /// Ticks during which one-way platforms are ignored after pressing down
    pub fall_through_ticks: u32,
    /// Distance within which a player collects dropped items
    pub pickup_radius: f32,
    /// Maximum distance, in tiles, between a mob and the tile it acts on
    pub reach_tiles: i32,
    /// Ticks between two tool progress notifications
    pub progress_interval: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            move_step: 7.0,
            gravity: 1.0,
            max_fall_speed: 20.0,
            jump_velocity: -13.0,
            ladder_speed: 4.0,
            fall_through_ticks: 12,
            pickup_radius: 48.0,
            reach_tiles: 6,
            progress_interval: 5,
        }
    }
}

/// Replication timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Version string compared against the host's announcement
    pub protocol_version: String,
    /// Interval between map requests while waiting for a host
    pub request_map_interval_ms: u64,
    /// Interval between actor state broadcasts
    pub actor_broadcast_interval_ms: u64,
    /// Interval between host announcements
    pub host_heartbeat_interval_ms: u64,
    /// Silence after which the host is considered gone
    pub host_timeout_ms: u64,
    /// Silence after which a remote mob is dropped
    pub mob_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            protocol_version: env!("CARGO_PKG_VERSION").to_string(),
            request_map_interval_ms: 2000,
            actor_broadcast_interval_ms: 100,
            host_heartbeat_interval_ms: 3000,
            host_timeout_ms: 10_000,
            mob_timeout_ms: 10_000,
        }
    }
}

/// Extension execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModConfig {
    /// Fuel granted to a WASM extension per hook invocation
    pub max_fuel_per_call: u64,
    /// Upper bound on events dispatched in one tick (cascading edits)
    pub max_events_per_tick: usize,
}

impl Default for ModConfig {
    fn default() -> Self {
        Self {
            max_fuel_per_call: 100_000,
            max_events_per_tick: 1024,
        }
    }
}

/// Everything a session needs to run a world
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seed used for world generation
    pub seed: u64,
    pub world: WorldConfig,
    pub physics: PhysicsConfig,
    pub network: NetworkConfig,
    pub mods: ModConfig,
}

/// Headless runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Database path (SQLite)
    pub database_path: String,
    /// Key under which the world is saved
    pub save_key: String,
    /// Autosave interval (seconds)
    pub autosave_interval_secs: u64,
    /// Simulation frames per second
    pub tick_rate_hz: u32,
    /// Mod bundle locations (URLs or directories), loaded in order
    pub mods: Vec<String>,
    /// Simulate and autosave without serving participants
    pub headless: bool,
    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            database_path: "./data/delve.db".to_string(),
            save_key: "world".to_string(),
            autosave_interval_secs: 120,
            tick_rate_hz: 60,
            mods: Vec::new(),
            headless: false,
            otel_endpoint: None,
            game: GameConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let world = WorldConfig::default();
        assert_eq!(world.width, 256);
        assert_eq!(world.tile_size, 32);

        let physics = PhysicsConfig::default();
        assert_eq!(physics.move_step, 7.0);
        assert!(physics.max_fall_speed < world.tile_size as f32);

        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert!(server.mods.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "port": 9000, "game": { "seed": 7, "world": { "width": 64 } } }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.game.seed, 7);
        assert_eq!(config.game.world.width, 64);
        assert_eq!(config.game.world.depth, 128);
        assert_eq!(config.tick_rate_hz, 60);
    }
}
