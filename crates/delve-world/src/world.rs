//! World state and the per-tick pipeline.
//!
//! A tick runs every mob's physics step (with its brain right after), then
//! item pickup and timers on the host, and finally delivers the tick's
//! buffered events to the mod sandbox. Commands returned by extensions are
//! applied before dispatch returns, and any events they cause are delivered
//! in the same tick up to `max_events_per_tick`.

use crate::discovery;
use crate::generator;
use crate::grid::{Portal, TileGrid};
use crate::lighting;
use crate::mob::{Mob, MobKind, MobSnapshot, TouchKind};
use crate::persistence;
use crate::physics::{self, Interaction, PhysicsContext, Touch};
use crate::timers::{self, FiredTimer, Timer};
use delve_core::blocks::ids;
use delve_core::{
    BlockRegistry, GameConfig, ItemStack, Layer, MobId, PeerId, Result, TileId, TilePos,
    ToolAction, ToolRegistry, EMPTY,
};
use delve_mods::{MobInfo, ModCommand, ModEvent, Sandbox, Services, TileSnapshot, WorldQuery};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const EXPLOSION_RADIUS: i32 = 2;
/// Removed mob ids remembered to turn away late snapshots
const TOMBSTONE_LIMIT: usize = 1024;

/// One replicated tile edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileChange {
    pub x: i32,
    pub y: i32,
    pub tile: TileId,
    pub layer: Layer,
}

impl TileChange {
    pub fn new(x: i32, y: i32, tile: TileId, layer: Layer) -> Self {
        Self { x, y, tile, layer }
    }
}

/// Where a tile edit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    /// A locally controlled mob or the embedding application
    Local,
    /// Received from another participant
    Remote,
    Mod,
    /// A block timer going off
    Effect,
}

/// Side effects the replication layer should send
#[derive(Debug, Default)]
pub struct Outbox {
    pub tile_changes: Vec<TileChange>,
    pub removed: Vec<MobId>,
    pub chat: Vec<(String, String)>,
    /// Items handed to mobs driven by other participants
    pub grants: Vec<(MobId, ItemStack)>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.tile_changes.is_empty()
            && self.removed.is_empty()
            && self.chat.is_empty()
            && self.grants.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalEntered {
    pub mob: MobId,
    pub destination: String,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub events: usize,
    pub failed_hooks: usize,
    pub fired_timers: usize,
    pub portals: Vec<PortalEntered>,
}

/// Read-only view handed to extensions and brains.
///
/// `active` is the mob currently being stepped, which is held outside the
/// mob table while its brain runs.
struct WorldView<'a> {
    grid: &'a TileGrid,
    mobs: &'a BTreeMap<MobId, Mob>,
    active: Option<&'a Mob>,
    tick: u64,
    is_host: bool,
    tile_size: i32,
    snapshot: OnceCell<Arc<TileSnapshot>>,
}

impl<'a> WorldQuery for WorldView<'a> {
    fn tile(&self, x: i32, y: i32, layer: Layer) -> TileId {
        self.grid.get_tile(x, y, layer)
    }

    fn light_level(&self, x: i32, y: i32) -> f32 {
        self.grid.light_level(x, y)
    }

    fn is_discovered(&self, x: i32, y: i32) -> bool {
        self.grid.is_discovered(x, y)
    }

    fn dimensions(&self) -> (i32, i32) {
        (self.grid.width(), self.grid.depth())
    }

    fn tile_size(&self) -> i32 {
        self.tile_size
    }

    fn tick(&self) -> u64 {
        self.tick
    }

    fn is_host(&self) -> bool {
        self.is_host
    }

    fn mob(&self, id: MobId) -> Option<MobInfo> {
        self.active
            .filter(|mob| mob.id == id)
            .or_else(|| self.mobs.get(&id))
            .map(Mob::info)
    }

    fn mobs(&self) -> Vec<MobInfo> {
        let mut infos: Vec<MobInfo> = self.mobs.values().map(Mob::info).collect();
        if let Some(mob) = self.active {
            infos.push(mob.info());
            infos.sort_by_key(|info| info.id);
        }
        infos
    }

    fn snapshot(&self) -> Arc<TileSnapshot> {
        self.snapshot
            .get_or_init(|| {
                Arc::new(TileSnapshot {
                    width: self.grid.width(),
                    depth: self.grid.depth(),
                    foreground: self.grid.layer(Layer::Foreground).to_vec(),
                    background: self.grid.layer(Layer::Background).to_vec(),
                })
            })
            .clone()
    }
}

fn touch_event(mob: MobId, touch: Touch) -> ModEvent {
    let Touch { kind, pos, tile } = touch;
    match kind {
        TouchKind::StandOn => ModEvent::StandOn { mob, pos, tile },
        TouchKind::BlockedBy => ModEvent::BlockedBy { mob, pos, tile },
        TouchKind::HitHead => ModEvent::HitHead { mob, pos, tile },
    }
}

/// Air cell above the first movement-blocking tile of the middle column
fn find_spawn(grid: &TileGrid, blocks: &BlockRegistry) -> TilePos {
    let x = grid.width() / 2;
    let ground = (0..grid.depth())
        .find(|&y| grid.is_blocking(x, y, blocks))
        .unwrap_or(grid.depth());
    TilePos::new(x, (ground - 1).max(0))
}

pub struct World {
    config: GameConfig,
    blocks: BlockRegistry,
    tools: ToolRegistry,
    grid: TileGrid,
    mobs: BTreeMap<MobId, Mob>,
    local_peer: PeerId,
    is_host: bool,
    tick: u64,
    spawn: TilePos,
    events: VecDeque<ModEvent>,
    outbox: Outbox,
    /// Last sequence seen for each removed mob
    tombstones: HashMap<MobId, u64>,
    tombstone_order: VecDeque<MobId>,
}

impl World {
    /// A freshly generated world from `config.seed`
    pub fn new(config: GameConfig, local_peer: PeerId, is_host: bool) -> Self {
        let mut grid = TileGrid::new(config.world.width, config.world.depth);
        generator::generate(&mut grid, &config.world, config.seed);
        Self::with_grid(config, local_peer, is_host, grid)
    }

    /// Restore a saved map, generating a new world if it cannot be read
    pub fn load(config: GameConfig, local_peer: PeerId, is_host: bool, bytes: &[u8]) -> Self {
        match persistence::deserialize_map(bytes, config.world.width, config.world.depth) {
            Ok(grid) => {
                info!(width = grid.width(), depth = grid.depth(), "Loaded saved world");
                Self::with_grid(config, local_peer, is_host, grid)
            }
            Err(e) => {
                warn!(error = %e, "Saved world unreadable, generating a new one");
                Self::new(config, local_peer, is_host)
            }
        }
    }

    /// Wrap an existing grid. Light and discovery are recomputed.
    pub fn with_grid(config: GameConfig, local_peer: PeerId, is_host: bool, grid: TileGrid) -> Self {
        let blocks = BlockRegistry::standard();
        let tools = ToolRegistry::standard(&blocks);
        let mut world = Self {
            config,
            blocks,
            tools,
            grid,
            mobs: BTreeMap::new(),
            local_peer,
            is_host,
            tick: 0,
            spawn: TilePos::new(0, 0),
            events: VecDeque::new(),
            outbox: Outbox::default(),
            tombstones: HashMap::new(),
            tombstone_order: VecDeque::new(),
        };
        world.settle_new_grid();
        world
    }

    fn settle_new_grid(&mut self) {
        self.spawn = find_spawn(&self.grid, &self.blocks);
        self.refresh_propagators();
        self.events.push_back(ModEvent::WorldStart);
    }

    fn refresh_propagators(&mut self) {
        lighting::recompute(&mut self.grid, &self.blocks);
        discovery::reveal(&mut self.grid, &self.blocks, self.spawn.x, self.spawn.y, true);
    }

    /// Replace the terrain with a generated one
    pub fn generate(&mut self, seed: u64) {
        self.grid = TileGrid::new(self.config.world.width, self.config.world.depth);
        self.spawn = generator::generate(&mut self.grid, &self.config.world, seed);
        self.refresh_propagators();
        self.events.push_back(ModEvent::WorldStart);
    }

    /// Clear every tile, keeping the dimensions
    pub fn reset(&mut self) {
        self.grid.reset();
        self.settle_new_grid();
    }

    pub fn serialize_map(&self) -> Result<Vec<u8>> {
        persistence::serialize_map(&self.grid)
    }

    /// Swap in a map received from the host. On error the current map stays.
    pub fn replace_map(&mut self, bytes: &[u8]) -> Result<()> {
        let grid =
            persistence::deserialize_map(bytes, self.config.world.width, self.config.world.depth)?;
        self.grid = grid;
        self.settle_new_grid();
        Ok(())
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockRegistry {
        &mut self.blocks
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn set_host(&mut self, is_host: bool) {
        self.is_host = is_host;
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn spawn(&self) -> TilePos {
        self.spawn
    }

    pub fn tile_size(&self) -> f32 {
        self.config.world.tile_size as f32
    }

    pub fn get_tile(&self, x: i32, y: i32, layer: Layer) -> TileId {
        self.grid.get_tile(x, y, layer)
    }

    pub fn light_level(&self, x: i32, y: i32) -> f32 {
        self.grid.light_level(x, y)
    }

    pub fn is_discovered(&self, x: i32, y: i32) -> bool {
        self.grid.is_discovered(x, y)
    }

    fn view(&self) -> WorldView<'_> {
        self.view_with(None)
    }

    fn view_with<'a>(&'a self, active: Option<&'a Mob>) -> WorldView<'a> {
        WorldView {
            grid: &self.grid,
            mobs: &self.mobs,
            active,
            tick: self.tick,
            is_host: self.is_host,
            tile_size: self.config.world.tile_size,
            snapshot: OnceCell::new(),
        }
    }

    // ---- mobs ----

    pub fn mobs(&self) -> impl Iterator<Item = &Mob> + '_ {
        self.mobs.values()
    }

    pub fn mob(&self, id: MobId) -> Option<&Mob> {
        self.mobs.get(&id)
    }

    pub fn mob_mut(&mut self, id: MobId) -> Option<&mut Mob> {
        self.mobs.get_mut(&id)
    }

    pub fn mob_count(&self) -> usize {
        self.mobs.len()
    }

    /// Whether this participant drives the mob's controls
    pub fn controls_mob(&self, mob: &Mob) -> bool {
        match mob.owner {
            Some(owner) => owner == self.local_peer,
            None => self.is_host,
        }
    }

    pub fn add_mob(&mut self, mob: Mob) -> MobId {
        let id = mob.id;
        debug!(mob_id = %id, name = %mob.name, kind = ?mob.kind, "Mob added");
        self.mobs.insert(id, mob);
        self.events.push_back(ModEvent::MobAdded { mob: id });
        id
    }

    /// Create a participant's avatar standing on the spawn point
    pub fn spawn_player(&mut self, peer: PeerId, name: impl Into<String>) -> MobId {
        let mut mob = Mob::player(peer, name, 0.0, 0.0);
        self.move_to_spawn(&mut mob);
        self.add_mob(mob)
    }

    /// Put an existing mob back on the spawn point
    pub fn respawn(&mut self, id: MobId) -> bool {
        let Some(mut mob) = self.mobs.remove(&id) else {
            return false;
        };
        self.move_to_spawn(&mut mob);
        self.mobs.insert(id, mob);
        true
    }

    fn move_to_spawn(&self, mob: &mut Mob) {
        let ts = self.tile_size();
        mob.x = self.spawn.x as f32 * ts + (ts - mob.width) / 2.0;
        mob.y = (self.spawn.y + 1) as f32 * ts - mob.height;
        mob.vy = 0.0;
    }

    /// Place a pickup centred on a pixel position
    pub fn drop_item(&mut self, stack: ItemStack, x: f32, y: f32) -> MobId {
        let size = self.tile_size() / 2.0;
        self.add_mob(Mob::item(stack, x - size / 2.0, y - size / 2.0, size))
    }

    /// Remove a mob for good.
    ///
    /// Later snapshots for the id are refused unless they are newer than the
    /// last state this world held; a mob it never saw is refused outright.
    pub fn remove_mob(&mut self, id: MobId) -> Option<Mob> {
        let removed = self.mobs.remove(&id);
        let last_sequence = removed.as_ref().map_or(u64::MAX, |mob| mob.sequence);
        self.bury(id, last_sequence);
        if removed.is_some() {
            debug!(mob_id = %id, "Mob removed");
        }
        removed
    }

    fn bury(&mut self, id: MobId, sequence: u64) {
        if self.tombstones.insert(id, sequence).is_none() {
            self.tombstone_order.push_back(id);
        }
        while self.tombstone_order.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    /// Give an item to a mob. On the host, items for remotely driven mobs
    /// are also queued so their owner can apply them.
    pub fn give_item(&mut self, id: MobId, stack: ItemStack) {
        let Some(mob) = self.mobs.get_mut(&id) else {
            debug!(mob_id = %id, "Item for unknown mob ignored");
            return;
        };
        mob.give(stack.clone());
        let remote_owner = mob.owner.is_some_and(|owner| owner != self.local_peer);
        if self.is_host && remote_owner {
            self.outbox.grants.push((id, stack));
        }
    }

    /// Apply a replicated mob state, returning whether it was newer than
    /// what this world already had
    pub fn apply_snapshot(&mut self, snapshot: &MobSnapshot, now_ms: u64) -> bool {
        match self.mobs.get_mut(&snapshot.id) {
            Some(mob) => {
                if snapshot.sequence <= mob.sequence {
                    trace!(
                        mob_id = %snapshot.id,
                        sequence = snapshot.sequence,
                        last = mob.sequence,
                        "Stale snapshot discarded"
                    );
                    return false;
                }
                mob.apply_snapshot(snapshot);
                mob.last_update_ms = now_ms;
                true
            }
            None => {
                if let Some(&last) = self.tombstones.get(&snapshot.id) {
                    if snapshot.sequence <= last {
                        trace!(
                            mob_id = %snapshot.id,
                            sequence = snapshot.sequence,
                            last,
                            "Snapshot for removed mob discarded"
                        );
                        return false;
                    }
                    self.tombstones.remove(&snapshot.id);
                    self.tombstone_order.retain(|id| *id != snapshot.id);
                }
                let mut mob = Mob::from_snapshot(snapshot);
                mob.last_update_ms = now_ms;
                self.add_mob(mob);
                true
            }
        }
    }

    /// Snapshots to broadcast this round.
    ///
    /// Mobs this participant drives get a fresh sequence number. The host
    /// also relays every other mob unchanged.
    pub fn broadcast_snapshots(&mut self, now_ms: u64) -> Vec<MobSnapshot> {
        let local_peer = self.local_peer;
        let is_host = self.is_host;
        let mut snapshots = Vec::new();

        for mob in self.mobs.values_mut() {
            let controlled = match mob.owner {
                Some(owner) => owner == local_peer,
                None => is_host,
            };
            if controlled {
                mob.sequence += 1;
                mob.last_update_ms = now_ms;
                snapshots.push(mob.snapshot());
            } else if is_host {
                snapshots.push(mob.snapshot());
            }
        }

        snapshots
    }

    /// Drop mobs driven elsewhere that have not been updated recently
    pub fn prune_stale(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<MobId> {
        let stale: Vec<MobId> = self
            .mobs
            .values()
            .filter(|mob| !self.controls_mob(mob))
            .filter(|mob| now_ms.saturating_sub(mob.last_update_ms) > timeout_ms)
            .map(|mob| mob.id)
            .collect();

        for id in &stale {
            self.mobs.remove(id);
            debug!(mob_id = %id, "Stale mob collected");
        }
        stale
    }

    /// Keep only the local participant's own mobs
    pub fn drop_remote_mobs(&mut self) -> usize {
        let local_peer = self.local_peer;
        let before = self.mobs.len();
        self.mobs.retain(|_, mob| mob.owner == Some(local_peer));
        before - self.mobs.len()
    }

    // ---- tiles ----

    /// Set one tile and run everything that follows from it
    pub fn set_tile(&mut self, x: i32, y: i32, tile: TileId, layer: Layer, origin: EditOrigin) -> bool {
        self.apply_edits(&[TileChange::new(x, y, tile, layer)], origin) > 0
    }

    /// Apply a batch of edits with a single propagator pass, returning how
    /// many cells actually changed (cascades included)
    pub fn apply_edits(&mut self, edits: &[TileChange], origin: EditOrigin) -> usize {
        let mut applied = Vec::new();
        for edit in edits {
            self.write_tile(*edit, &mut applied);
        }
        if applied.is_empty() {
            return 0;
        }
        self.cascade(&mut applied);

        lighting::recompute(&mut self.grid, &self.blocks);
        for (change, previous) in &applied {
            if change.layer == Layer::Foreground && change.tile == EMPTY {
                discovery::reveal(&mut self.grid, &self.blocks, change.x, change.y, true);
            }

            debug!(
                event = "tile_set",
                x = change.x,
                y = change.y,
                tile = change.tile,
                previous = *previous,
                layer = ?change.layer,
                origin = ?origin,
                "Tile set"
            );
            self.events.push_back(ModEvent::TileSet {
                pos: TilePos::new(change.x, change.y),
                layer: change.layer,
                tile: change.tile,
                previous: *previous,
            });
            if origin != EditOrigin::Remote {
                self.outbox.tile_changes.push(*change);
            }
        }

        applied.len()
    }

    fn write_tile(&mut self, change: TileChange, applied: &mut Vec<(TileChange, TileId)>) {
        let TileChange { x, y, tile, layer } = change;
        if !self.grid.in_bounds(x, y) || self.grid.get_tile(x, y, layer) == tile {
            return;
        }
        let Some(previous) = self.grid.write(x, y, layer, tile) else {
            return;
        };

        if let (Some(def), Some(index)) = (self.blocks.lookup(tile), self.grid.index(x, y)) {
            if let Some(timer) = &def.timer {
                self.grid
                    .metadata
                    .timers
                    .push(Timer::new(index, layer, timer.ticks, timer.effect.clone()));
            }
            if let (Some(portal), Layer::Foreground) = (&def.portal, layer) {
                self.grid.metadata.portals.push(Portal {
                    index,
                    destination: portal.default_destination.clone(),
                });
            }
        }

        applied.push((change, previous));
    }

    /// Remove tiles that lost the ground they need
    fn cascade(&mut self, applied: &mut Vec<(TileChange, TileId)>) {
        let mut next = 0;
        while next < applied.len() {
            let (change, _) = applied[next];
            next += 1;
            if change.layer != Layer::Foreground || self.blocks.blocks_movement(change.tile) {
                continue;
            }
            let above = self.grid.get_tile(change.x, change.y - 1, Layer::Foreground);
            if self
                .blocks
                .lookup(above)
                .is_some_and(|def| def.needs_ground_below)
            {
                self.write_tile(
                    TileChange::new(change.x, change.y - 1, EMPTY, Layer::Foreground),
                    applied,
                );
            }
        }
    }

    /// Everything the replication layer should send since the last call
    pub fn take_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    // ---- tick ----

    /// Deliver one event (and whatever it causes) to the sandbox now.
    ///
    /// `GameStart` goes ahead of anything already buffered, so extensions
    /// see it before the `WorldStart` queued when the grid was built.
    pub fn dispatch(&mut self, sandbox: &mut Sandbox, event: ModEvent) -> usize {
        match event {
            ModEvent::GameStart => self.events.push_front(event),
            _ => self.events.push_back(event),
        }
        self.drain_events(sandbox).1
    }

    pub fn step(&mut self, sandbox: &mut Sandbox) -> TickReport {
        let mut report = TickReport {
            tick: self.tick,
            ..Default::default()
        };

        let ids: Vec<MobId> = self.mobs.keys().copied().collect();
        for id in ids {
            let Some(mut mob) = self.mobs.remove(&id) else {
                continue;
            };
            self.step_mob(&mut mob, &mut report);
            self.mobs.insert(id, mob);
        }

        if self.is_host {
            self.collect_items();
            let fired = timers::advance(&mut self.grid);
            report.fired_timers = fired.len();
            for timer in fired {
                self.fire_timer(timer);
            }
        }

        self.events.push_back(ModEvent::Tick { tick: self.tick });
        let (events, failed) = self.drain_events(sandbox);
        report.events = events;
        report.failed_hooks = failed;

        self.tick += 1;
        report
    }

    fn step_mob(&mut self, mob: &mut Mob, report: &mut TickReport) {
        let authority = self.controls_mob(mob);
        let outcome = {
            let ctx = PhysicsContext {
                grid: &self.grid,
                blocks: &self.blocks,
                tools: &self.tools,
                config: &self.config.physics,
                tile_size: self.tile_size(),
                interact: authority,
            };
            physics::step(mob, &ctx)
        };

        for touch in outcome.touches {
            self.events.push_back(touch_event(mob.id, touch));
        }
        if let Some(interaction) = outcome.interaction {
            self.interact(mob, interaction);
        }

        if !authority {
            return;
        }

        if let Some(mut brain) = mob.brain.take() {
            let mut handle = mob.handle();
            let view = self.view_with(Some(&*mob));
            let thought = panic::catch_unwind(AssertUnwindSafe(|| brain.think(&mut handle, &view)));
            match thought {
                Ok(()) => {
                    let (controls, vy) = handle.into_parts();
                    mob.controls = controls;
                    mob.vy = vy;
                    mob.brain = Some(brain);
                }
                Err(_) => {
                    warn!(mob_id = %mob.id, name = %mob.name, "Brain panicked and was detached");
                }
            }
        }

        self.check_portal(mob, report);
    }

    fn interact(&mut self, mob: &mut Mob, interaction: Interaction) {
        match interaction {
            Interaction::Completed { tool, pos, action } => {
                match action {
                    ToolAction::Dig => self.dig(mob, pos),
                    ToolAction::Place { tile, layer } => {
                        if self.set_tile(pos.x, pos.y, tile, layer, EditOrigin::Local) {
                            mob.consume_held();
                        }
                    }
                    ToolAction::Trigger => {}
                }
                self.events.push_back(ModEvent::ToolUse {
                    mob: mob.id,
                    tool,
                    pos,
                });
            }
            Interaction::Progress {
                tool,
                pos,
                progress,
            } => self.events.push_back(ModEvent::ToolProgress {
                mob: mob.id,
                tool,
                pos,
                progress,
            }),
            Interaction::Trigger { pos, tile } => self.events.push_back(ModEvent::Trigger {
                mob: mob.id,
                pos,
                tile,
            }),
        }
    }

    fn dig(&mut self, mob: &mut Mob, pos: TilePos) {
        let foreground = self.grid.get_tile(pos.x, pos.y, Layer::Foreground);
        let background = self.grid.get_tile(pos.x, pos.y, Layer::Background);

        let (dug, mut edits) = if foreground != EMPTY {
            (foreground, vec![TileChange::new(pos.x, pos.y, EMPTY, Layer::Foreground)])
        } else {
            (background, vec![TileChange::new(pos.x, pos.y, EMPTY, Layer::Background)])
        };
        let Some(def) = self.blocks.lookup(dug).cloned() else {
            return;
        };
        if foreground != EMPTY && def.leaves_background_copy && background == EMPTY {
            edits.push(TileChange::new(pos.x, pos.y, dug, Layer::Background));
        }

        if self.apply_edits(&edits, EditOrigin::Local) > 0 {
            if let Some(item) = def.tool_id {
                mob.give(ItemStack::new(item, 1));
            }
        }
    }

    fn check_portal(&mut self, mob: &mut Mob, report: &mut TickReport) {
        let ts = self.tile_size();
        let (cx, cy) = mob.center();
        let (x, y) = ((cx / ts).floor() as i32, (cy / ts).floor() as i32);

        let destination = self.grid.index(x, y).and_then(|index| {
            let tile = self.grid.get_tile(x, y, Layer::Foreground);
            self.blocks.lookup(tile)?.portal.as_ref()?;
            let destination = self.grid.metadata.portal(index)?.destination.clone()?;
            Some((index, destination))
        });

        match destination {
            Some((index, destination)) => {
                if mob.in_portal != Some(index) {
                    info!(event = "portal_entered", mob_id = %mob.id, destination = %destination, "Mob entered portal");
                    report.portals.push(PortalEntered {
                        mob: mob.id,
                        destination,
                    });
                }
                mob.in_portal = Some(index);
            }
            None => mob.in_portal = None,
        }
    }

    /// Each player picks up at most one nearby item per tick
    fn collect_items(&mut self) {
        let radius = self.config.physics.pickup_radius;
        let mut items: Vec<(MobId, (f32, f32))> = self
            .mobs
            .values()
            .filter(|mob| matches!(mob.kind, MobKind::Item(_)))
            .map(|mob| (mob.id, mob.center()))
            .collect();
        let players: Vec<(MobId, (f32, f32))> = self
            .mobs
            .values()
            .filter(|mob| mob.is_player())
            .map(|mob| (mob.id, mob.center()))
            .collect();

        for (player, (px, py)) in players {
            let Some(slot) = items.iter().position(|(_, (ix, iy))| {
                let (dx, dy) = (ix - px, iy - py);
                (dx * dx + dy * dy).sqrt() <= radius
            }) else {
                continue;
            };
            let (item_id, _) = items.remove(slot);
            let Some(item) = self.remove_mob(item_id) else {
                continue;
            };
            if let MobKind::Item(stack) = item.kind {
                debug!(event = "pickup", player = %player, item = %stack.item, count = stack.count, "Item picked up");
                self.give_item(player, stack);
            }
            self.outbox.removed.push(item_id);
        }
    }

    fn fire_timer(&mut self, timer: FiredTimer) {
        debug!(event = "timer_fired", x = timer.pos.x, y = timer.pos.y, effect = %timer.effect, "Timer fired");
        if timer.layer == Layer::Foreground {
            match timer.effect.as_str() {
                "explode" => self.explode(timer.pos),
                "grow" => self.grow(timer.pos),
                _ => {}
            }
        }
        self.events.push_back(ModEvent::TimerFired {
            pos: timer.pos,
            layer: timer.layer,
            effect: timer.effect,
        });
    }

    fn explode(&mut self, centre: TilePos) {
        let ts = self.tile_size();
        let mut edits = Vec::new();
        let mut drops = Vec::new();

        for dy in -EXPLOSION_RADIUS..=EXPLOSION_RADIUS {
            for dx in -EXPLOSION_RADIUS..=EXPLOSION_RADIUS {
                if dx * dx + dy * dy > EXPLOSION_RADIUS * EXPLOSION_RADIUS {
                    continue;
                }
                let pos = centre.add(dx, dy);
                if !self.grid.in_bounds(pos.x, pos.y) {
                    continue;
                }
                let tile = self.grid.get_tile(pos.x, pos.y, Layer::Foreground);
                let Some(item) = self.blocks.lookup(tile).and_then(|def| def.tool_id.clone()) else {
                    continue;
                };
                edits.push(TileChange::new(pos.x, pos.y, EMPTY, Layer::Foreground));
                if pos != centre {
                    drops.push((item, pos));
                }
            }
        }

        info!(event = "explosion", x = centre.x, y = centre.y, cleared = edits.len(), "Explosion");
        self.apply_edits(&edits, EditOrigin::Effect);
        for (item, pos) in drops {
            let x = (pos.x as f32 + 0.5) * ts;
            let y = (pos.y as f32 + 0.5) * ts;
            self.drop_item(ItemStack::new(item, 1), x, y);
        }
    }

    fn grow(&mut self, base: TilePos) {
        let mut edits = vec![TileChange::new(base.x, base.y, ids::WOOD, Layer::Foreground)];
        for dy in 1..=2 {
            if self.grid.get_tile(base.x, base.y - dy, Layer::Foreground) == EMPTY {
                edits.push(TileChange::new(base.x, base.y - dy, ids::WOOD, Layer::Foreground));
            }
        }
        for (dx, dy) in [(-1, 2), (1, 2), (0, 3), (-1, 3), (1, 3)] {
            let (x, y) = (base.x + dx, base.y - dy);
            if self.grid.in_bounds(x, y) && self.grid.get_tile(x, y, Layer::Foreground) == EMPTY {
                edits.push(TileChange::new(x, y, ids::LEAVES, Layer::Foreground));
            }
        }
        self.apply_edits(&edits, EditOrigin::Effect);
    }

    /// Deliver queued events, returning (delivered, failed hook calls)
    fn drain_events(&mut self, sandbox: &mut Sandbox) -> (usize, usize) {
        let cap = self.config.mods.max_events_per_tick.max(1);
        let mut delivered = 0;
        let mut failed = 0;

        while let Some(event) = self.events.pop_front() {
            if delivered >= cap {
                warn!(
                    event = "mod_event_overflow",
                    dropped = self.events.len() + 1,
                    cap,
                    "Too many mod events this tick, dropping the rest"
                );
                self.events.clear();
                break;
            }
            delivered += 1;

            let report = {
                let view = WorldView {
                    grid: &self.grid,
                    mobs: &self.mobs,
                    active: None,
                    tick: self.tick,
                    is_host: self.is_host,
                    tile_size: self.config.world.tile_size,
                    snapshot: OnceCell::new(),
                };
                let mut services = Services {
                    blocks: &mut self.blocks,
                    tools: &mut self.tools,
                    world: &view,
                };
                sandbox.dispatch(&event, &mut services)
            };

            failed += report.failed;
            for command in report.commands {
                self.apply_command(command);
            }
        }

        (delivered, failed)
    }

    fn apply_command(&mut self, command: ModCommand) {
        trace!(command = ?command, "Applying mod command");
        match command {
            ModCommand::SetTile { x, y, layer, tile } => {
                self.set_tile(x, y, tile, layer, EditOrigin::Mod);
            }
            ModCommand::SpawnMob(spawn) => {
                let mut mob = Mob::new(
                    spawn.id,
                    spawn.name,
                    MobKind::Creature,
                    spawn.x,
                    spawn.y,
                    spawn.width,
                    spawn.height,
                );
                mob.brain = spawn.brain;
                self.add_mob(mob);
            }
            ModCommand::RemoveMob(id) => {
                if self.remove_mob(id).is_some() {
                    self.outbox.removed.push(id);
                }
            }
            ModCommand::SetVelocity { mob, vy } => {
                if let Some(mob) = self.mobs.get_mut(&mob) {
                    mob.vy = vy;
                }
            }
            ModCommand::Teleport { mob, x, y } => {
                if let Some(mob) = self.mobs.get_mut(&mob) {
                    mob.x = x;
                    mob.y = y;
                }
            }
            ModCommand::SetControls { mob, controls } => {
                if let Some(mob) = self.mobs.get_mut(&mob) {
                    mob.controls = controls;
                }
            }
            ModCommand::GiveItem { mob, item } => self.give_item(mob, item),
            ModCommand::AttachBrain { mob, brain } => {
                if let Some(mob) = self.mobs.get_mut(&mob) {
                    mob.brain = Some(brain);
                }
            }
            ModCommand::SetPortalDestination { x, y, destination } => {
                let Some(index) = self.grid.index(x, y) else {
                    return;
                };
                match self.grid.metadata.portal_mut(index) {
                    Some(portal) => portal.destination = destination,
                    None => debug!(x, y, "No portal to retarget"),
                }
            }
            ModCommand::Chat { from, text } => {
                info!(event = "chat", from = %from, "{}", text);
                self.outbox.chat.push((from, text));
            }
        }
    }
}
