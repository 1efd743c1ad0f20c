//! Think callbacks for scripted mobs.

use crate::context::WorldQuery;
use delve_core::{Controls, MobId, MobState};

/// Per-tick behaviour attached to a mob.
///
/// The implementing value is the brain's whole state; it is owned by the mob
/// and only sees the mob through a [`MobHandle`] and the world through a
/// read-only [`WorldQuery`]. Brains run after physics, so velocity written
/// here overrides the resolved velocity for the rest of the tick.
pub trait Brain: Send {
    fn think(&mut self, mob: &mut MobHandle, world: &dyn WorldQuery);
}

/// Restricted view of a mob handed to its brain
#[derive(Debug, Clone)]
pub struct MobHandle {
    id: MobId,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    state: MobState,
    vy: f32,
    controls: Controls,
}

impl MobHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MobId,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        state: MobState,
        vy: f32,
        controls: Controls,
    ) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            state,
            vy,
            controls,
        }
    }

    pub fn id(&self) -> MobId {
        self.id
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// Contact flags from this tick's physics step
    pub fn state(&self) -> &MobState {
        &self.state
    }

    pub fn velocity(&self) -> f32 {
        self.vy
    }

    pub fn set_velocity(&mut self, vy: f32) {
        self.vy = vy;
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut Controls {
        &mut self.controls
    }

    /// The writable parts, copied back onto the mob after thinking
    pub fn into_parts(self) -> (Controls, f32) {
        (self.controls, self.vy)
    }
}

/// Walks in one direction and turns around whenever it bumps into something.
#[derive(Debug, Clone, Default)]
pub struct Pacer {
    pub heading_left: bool,
}

impl Brain for Pacer {
    fn think(&mut self, mob: &mut MobHandle, _world: &dyn WorldQuery) {
        let state = *mob.state();
        if self.heading_left && state.blocked_left {
            self.heading_left = false;
        } else if !self.heading_left && state.blocked_right {
            self.heading_left = true;
        }

        let controls = mob.controls_mut();
        controls.left = self.heading_left;
        controls.right = !self.heading_left;
    }
}
