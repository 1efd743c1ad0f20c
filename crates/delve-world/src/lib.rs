//! World-state engine.
//!
//! Owns the tile grid and its light and discovery maps, block timers, mobs
//! and their physics, and runs the per-tick pipeline that feeds the mod
//! sandbox.

pub mod discovery;
pub mod generator;
pub mod grid;
pub mod lighting;
pub mod mob;
pub mod persistence;
pub mod physics;
pub mod timers;
pub mod world;

pub use grid::{Portal, TileGrid, WorldMetadata};
pub use mob::{Mob, MobKind, MobSnapshot, TouchKind};
pub use persistence::{deserialize_map, serialize_map};
pub use timers::Timer;
pub use world::{EditOrigin, Outbox, PortalEntered, TickReport, TileChange, World};
