//! Core types and utilities shared by every part of the Delve sandbox engine.

pub mod blocks;
pub mod config;
pub mod error;
pub mod types;

pub use blocks::{BlockDef, BlockRegistry, PortalSpec, TimerSpec, ToolAction, ToolDef, ToolRegistry};
pub use config::*;
pub use error::{Error, Result};
pub use types::*;
