//! Countdown timers attached to placed blocks.

use crate::grid::TileGrid;
use delve_core::{Layer, TilePos};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub index: usize,
    pub layer: Layer,
    pub remaining_ticks: u32,
    pub effect: String,
}

impl Timer {
    pub fn new(index: usize, layer: Layer, ticks: u32, effect: impl Into<String>) -> Self {
        Self {
            index,
            layer,
            remaining_ticks: ticks,
            effect: effect.into(),
        }
    }
}

/// A timer that reached zero this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub pos: TilePos,
    pub layer: Layer,
    pub effect: String,
}

/// Count every active timer down by one tick.
///
/// Timers that reach zero are removed and returned in registration order.
/// A timer registered with zero ticks fires on the first advance.
pub fn advance(grid: &mut TileGrid) -> Vec<FiredTimer> {
    let mut fired = Vec::new();
    let mut remaining = Vec::with_capacity(grid.metadata.timers.len());

    for mut timer in std::mem::take(&mut grid.metadata.timers) {
        timer.remaining_ticks = timer.remaining_ticks.saturating_sub(1);
        if timer.remaining_ticks == 0 {
            fired.push(FiredTimer {
                pos: grid.position(timer.index),
                layer: timer.layer,
                effect: timer.effect,
            });
        } else {
            remaining.push(timer);
        }
    }

    grid.metadata.timers = remaining;
    fired
}
