//! Per-tick movement and collision for mobs.
//!
//! Mobs are axis-aligned boxes positioned by their top-left corner in world
//! pixels. A step reads the grid but never writes it: tool actions that
//! complete are handed back to the world, which performs the edit.

use crate::grid::TileGrid;
use crate::mob::{ActionState, Mob, TouchKind};
use delve_core::{
    BlockRegistry, Layer, MobState, PhysicsConfig, TileId, TilePos, ToolAction, ToolRegistry,
    EMPTY,
};

/// Read-only inputs to one physics step
pub struct PhysicsContext<'a> {
    pub grid: &'a TileGrid,
    pub blocks: &'a BlockRegistry,
    pub tools: &'a ToolRegistry,
    pub config: &'a PhysicsConfig,
    pub tile_size: f32,
    /// Whether this peer acts on the mob's held item
    pub interact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub kind: TouchKind,
    pub pos: TilePos,
    pub tile: TileId,
}

/// Result of the held-item phase
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Completed {
        tool: String,
        pos: TilePos,
        action: ToolAction,
    },
    Progress {
        tool: String,
        pos: TilePos,
        progress: f32,
    },
    Trigger {
        pos: TilePos,
        tile: TileId,
    },
}

#[derive(Debug, Default)]
pub struct StepOutcome {
    pub touches: Vec<Touch>,
    pub interaction: Option<Interaction>,
}

impl<'a> PhysicsContext<'a> {
    fn cell(&self, pixel: f32) -> i32 {
        (pixel / self.tile_size).floor() as i32
    }

    fn tile(&self, pos: TilePos) -> TileId {
        self.grid.get_tile(pos.x, pos.y, Layer::Foreground)
    }

    fn blocking(&self, pos: TilePos) -> bool {
        self.grid.is_blocking(pos.x, pos.y, self.blocks)
    }

    /// Columns under the left edge, middle and right edge of a mob
    fn columns(&self, mob: &Mob) -> [i32; 3] {
        [
            self.cell(mob.x),
            self.cell(mob.x + mob.width / 2.0),
            self.cell(mob.x + mob.width - 1.0),
        ]
    }

    fn on_ladder(&self, mob: &Mob) -> bool {
        let column = self.cell(mob.x + mob.width / 2.0);
        [mob.y + mob.height / 2.0, mob.y + mob.height - 1.0]
            .into_iter()
            .any(|py| self.blocks.is_ladder(self.tile(TilePos::new(column, self.cell(py)))))
    }

    fn ladder_below(&self, mob: &Mob) -> bool {
        let pos = TilePos::new(self.cell(mob.x + mob.width / 2.0), self.cell(mob.y + mob.height));
        self.blocks.is_ladder(self.tile(pos))
    }

    fn platform_below(&self, mob: &Mob) -> bool {
        let row = self.cell(mob.y + mob.height);
        self.columns(mob)
            .into_iter()
            .any(|column| self.blocks.is_platform(self.tile(TilePos::new(column, row))))
    }

    /// The first tile under the mob's feet it can rest on.
    ///
    /// `previous_bottom` is where the feet were before this tick's vertical
    /// move, so a fast fall onto a platform still lands on it.
    fn support(&self, mob: &Mob, previous_bottom: f32) -> Option<(TilePos, TileId)> {
        let bottom = mob.y + mob.height;
        let row = self.cell(bottom);
        let top = row as f32 * self.tile_size;
        let near_top = bottom - top <= self.tile_size / 4.0 || previous_bottom <= top;

        for column in self.columns(mob) {
            let pos = TilePos::new(column, row);
            let tile = self.tile(pos);
            if self.blocking(pos) {
                return Some((pos, tile));
            }
            let falling = mob.vy >= 0.0 && near_top;
            if falling && mob.fall_through == 0 && self.blocks.is_platform(tile) {
                return Some((pos, tile));
            }
            if falling && !mob.state.on_ladder && !mob.controls.down && self.blocks.is_ladder(tile) {
                return Some((pos, tile));
            }
        }
        None
    }

    fn overlaps(&self, mob: &Mob, pos: TilePos) -> bool {
        let left = pos.x as f32 * self.tile_size;
        let top = pos.y as f32 * self.tile_size;
        mob.x < left + self.tile_size
            && mob.x + mob.width > left
            && mob.y < top + self.tile_size
            && mob.y + mob.height > top
    }

    fn can_perform(&self, mob: &Mob, action: &ToolAction, pos: TilePos) -> bool {
        if !self.grid.in_bounds(pos.x, pos.y) {
            return false;
        }
        match action {
            ToolAction::Dig => {
                let foreground = self.tile(pos);
                let tile = if foreground != EMPTY {
                    foreground
                } else {
                    self.grid.get_tile(pos.x, pos.y, Layer::Background)
                };
                self.blocks
                    .lookup(tile)
                    .is_some_and(|def| def.tool_id.is_some())
            }
            ToolAction::Place { tile, layer } => {
                let Some(def) = self.blocks.lookup(*tile) else {
                    return false;
                };
                if self.grid.get_tile(pos.x, pos.y, *layer) != EMPTY {
                    return false;
                }
                if *layer == Layer::Background && def.background_placement_disabled {
                    return false;
                }
                if def.needs_ground_below && !self.blocking(pos.add(0, 1)) {
                    return false;
                }
                !(*layer == Layer::Foreground && def.blocks_movement && self.overlaps(mob, pos))
            }
            ToolAction::Trigger => true,
        }
    }
}

fn touch(mob: &mut Mob, outcome: &mut StepOutcome, kind: TouchKind, pos: TilePos, tile: TileId) {
    if mob.touches.record(kind, pos) {
        outcome.touches.push(Touch { kind, pos, tile });
    }
}

/// Advance one mob by one tick
pub fn step(mob: &mut Mob, ctx: &PhysicsContext<'_>) -> StepOutcome {
    let config = ctx.config;
    let ts = ctx.tile_size;
    let mut outcome = StepOutcome::default();

    mob.state = MobState::default();
    mob.touches.reset();
    mob.state.on_ladder = ctx.on_ladder(mob);

    // Control intent
    let grounded = ctx.support(mob, mob.y + mob.height).is_some();
    let mut dx = 0.0;
    if mob.controls.left && !mob.controls.right {
        dx = -config.move_step;
        mob.flipped = true;
    } else if mob.controls.right && !mob.controls.left {
        dx = config.move_step;
        mob.flipped = false;
    }

    if mob.controls.up {
        if mob.state.on_ladder {
            mob.vy = -config.ladder_speed;
        } else if grounded {
            mob.vy = config.jump_velocity;
        }
    } else if mob.controls.down {
        if mob.state.on_ladder || ctx.ladder_below(mob) {
            mob.vy = config.ladder_speed;
        } else if grounded && ctx.platform_below(mob) {
            mob.fall_through = config.fall_through_ticks;
        }
    } else if mob.state.on_ladder {
        mob.vy = 0.0;
    }

    if ctx.interact {
        outcome.interaction = interact(mob, ctx);
    }

    // Head
    if mob.vy < 0.0 {
        let row = ctx.cell(mob.y + mob.vy);
        for column in ctx.columns(mob) {
            let pos = TilePos::new(column, row);
            if ctx.blocking(pos) {
                mob.vy = 0.0;
                mob.y = (row + 1) as f32 * ts;
                mob.state.blocked_above = true;
                touch(mob, &mut outcome, TouchKind::HitHead, pos, ctx.tile(pos));
            }
        }
    }

    // Gravity
    mob.fall_through = mob.fall_through.saturating_sub(1);
    if !mob.state.on_ladder && ctx.support(mob, mob.y + mob.height).is_none() {
        mob.vy = (mob.vy + config.gravity).min(config.max_fall_speed);
    }

    // Horizontal
    if dx != 0.0 {
        let next_x = mob.x + dx;
        let edge = if dx > 0.0 { next_x + mob.width - 1.0 } else { next_x };
        let column = ctx.cell(edge);
        let mut blocked = false;

        for i in 0..5 {
            let py = mob.y + (mob.height - 1.0) * i as f32 / 4.0;
            let pos = TilePos::new(column, ctx.cell(py));
            if ctx.blocking(pos) {
                blocked = true;
                touch(mob, &mut outcome, TouchKind::BlockedBy, pos, ctx.tile(pos));
            }
        }

        if !blocked {
            mob.x = next_x;
        } else if dx > 0.0 {
            mob.x = column as f32 * ts - mob.width;
            mob.state.blocked_right = true;
        } else {
            mob.x = (column + 1) as f32 * ts;
            mob.state.blocked_left = true;
        }
    }

    // Vertical
    let previous_bottom = mob.y + mob.height;
    mob.y += mob.vy;
    if mob.vy >= 0.0 {
        if let Some((pos, tile)) = ctx.support(mob, previous_bottom) {
            mob.y = pos.y as f32 * ts - mob.height;
            mob.vy = 0.0;
            mob.state.blocked_below = true;
            touch(mob, &mut outcome, TouchKind::StandOn, pos, tile);
        }
    }

    outcome
}

fn interact(mob: &mut Mob, ctx: &PhysicsContext<'_>) -> Option<Interaction> {
    let target = match (mob.controls.primary, mob.controls.target) {
        (true, Some(target)) => target,
        _ => {
            mob.action = ActionState::default();
            return None;
        }
    };

    if mob.action.last_acted == Some(target) {
        return None;
    }
    if mob.action.target != Some(target) {
        mob.action.target = Some(target);
        mob.action.damage = 0;
    }

    let (cx, cy) = mob.center();
    let here = TilePos::new(ctx.cell(cx), ctx.cell(cy));
    if here.chebyshev_distance(&target) > ctx.config.reach_tiles {
        mob.action.damage = 0;
        return None;
    }

    let tool = match mob.held_item() {
        None => None,
        Some(stack) => match ctx.tools.get(&stack.item) {
            Some(tool) => Some(tool.clone()),
            None => {
                mob.action.damage = 0;
                return None;
            }
        },
    };

    let tool = match tool {
        Some(tool) if tool.action != ToolAction::Trigger => tool,
        _ => {
            mob.action.last_acted = Some(target);
            let tile = ctx.tile(target);
            return (ctx.grid.in_bounds(target.x, target.y) && tile != EMPTY)
                .then_some(Interaction::Trigger { pos: target, tile });
        }
    };

    if !ctx.can_perform(mob, &tool.action, target) {
        mob.action.damage = 0;
        return None;
    }

    mob.action.damage += 1;
    let delay = tool.delay.max(1);
    if mob.action.damage >= delay {
        mob.action.damage = 0;
        mob.action.last_acted = Some(target);
        return Some(Interaction::Completed {
            tool: tool.id,
            pos: target,
            action: tool.action,
        });
    }

    let interval = ctx.config.progress_interval;
    if interval > 0 && mob.action.damage % interval == 0 {
        return Some(Interaction::Progress {
            tool: tool.id,
            pos: target,
            progress: mob.action.damage as f32 / delay as f32,
        });
    }

    None
}
