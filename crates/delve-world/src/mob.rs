//! Mobile actors.

use delve_core::{Controls, ItemStack, MobId, MobState, PeerId, TilePos};
use delve_mods::{Brain, MobHandle, MobInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MobKind {
    Player,
    Creature,
    /// A dropped item waiting to be picked up
    Item(ItemStack),
}

/// Every replicated field of a mob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobSnapshot {
    pub id: MobId,
    pub name: String,
    pub kind: MobKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub flipped: bool,
    pub vy: f32,
    pub controls: Controls,
    pub state: MobState,
    pub inventory: Vec<ItemStack>,
    pub held: usize,
    pub owner: Option<PeerId>,
    pub sequence: u64,
}

/// Progress of the held tool against one target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ActionState {
    pub target: Option<TilePos>,
    pub damage: u32,
    /// Tile the last completed action hit; cleared when primary is released
    pub last_acted: Option<TilePos>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchKind {
    StandOn,
    BlockedBy,
    HitHead,
}

impl TouchKind {
    fn slot(self) -> usize {
        match self {
            TouchKind::StandOn => 0,
            TouchKind::BlockedBy => 1,
            TouchKind::HitHead => 2,
        }
    }
}

/// Remembers the last tile touched per kind so repeated contacts fire once.
///
/// The tracker is cleared at the start of every physics step, so the
/// deduplication holds within one tick: a mob resting on the same tile
/// reports `StandOn` again each tick.
#[derive(Debug, Clone, Default)]
pub(crate) struct TouchTracker {
    last: [Option<TilePos>; 3],
}

impl TouchTracker {
    pub fn reset(&mut self) {
        self.last = [None; 3];
    }

    /// True when this contact differs from the previous one of its kind
    pub fn record(&mut self, kind: TouchKind, pos: TilePos) -> bool {
        let slot = &mut self.last[kind.slot()];
        if *slot == Some(pos) {
            return false;
        }
        *slot = Some(pos);
        true
    }
}

pub struct Mob {
    pub id: MobId,
    pub name: String,
    pub kind: MobKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub flipped: bool,
    pub vy: f32,
    pub controls: Controls,
    pub state: MobState,
    pub inventory: Vec<ItemStack>,
    pub held: usize,
    /// Participant whose client drives this mob; `None` for host-driven mobs
    pub owner: Option<PeerId>,
    pub sequence: u64,
    pub last_update_ms: u64,
    pub brain: Option<Box<dyn Brain>>,
    pub(crate) action: ActionState,
    pub(crate) fall_through: u32,
    pub(crate) touches: TouchTracker,
    pub(crate) in_portal: Option<usize>,
}

impl fmt::Debug for Mob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("vy", &self.vy)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("has_brain", &self.brain.is_some())
            .finish()
    }
}

impl Mob {
    pub fn new(id: MobId, name: impl Into<String>, kind: MobKind, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            x,
            y,
            width,
            height,
            flipped: false,
            vy: 0.0,
            controls: Controls::default(),
            state: MobState::default(),
            inventory: Vec::new(),
            held: 0,
            owner: None,
            sequence: 0,
            last_update_ms: 0,
            brain: None,
            action: ActionState::default(),
            fall_through: 0,
            touches: TouchTracker::default(),
            in_portal: None,
        }
    }

    /// A participant's avatar, sized 40x90 like every player
    pub fn player(peer: PeerId, name: impl Into<String>, x: f32, y: f32) -> Self {
        let mut mob = Self::new(peer.player_mob(), name, MobKind::Player, x, y, 40.0, 90.0);
        mob.owner = Some(peer);
        mob
    }

    pub fn item(stack: ItemStack, x: f32, y: f32, size: f32) -> Self {
        let name = stack.item.clone();
        Self::new(MobId::new(), name, MobKind::Item(stack), x, y, size, size)
    }

    pub fn from_snapshot(snapshot: &MobSnapshot) -> Self {
        let mut mob = Self::new(
            snapshot.id,
            snapshot.name.clone(),
            snapshot.kind.clone(),
            snapshot.x,
            snapshot.y,
            snapshot.width,
            snapshot.height,
        );
        mob.apply_snapshot(snapshot);
        mob
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, MobKind::Player)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn snapshot(&self) -> MobSnapshot {
        MobSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.clone(),
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            flipped: self.flipped,
            vy: self.vy,
            controls: self.controls.clone(),
            state: self.state,
            inventory: self.inventory.clone(),
            held: self.held,
            owner: self.owner,
            sequence: self.sequence,
        }
    }

    /// Overwrite the replicated fields. Sequence filtering is the caller's job.
    pub fn apply_snapshot(&mut self, snapshot: &MobSnapshot) {
        self.name = snapshot.name.clone();
        self.kind = snapshot.kind.clone();
        self.x = snapshot.x;
        self.y = snapshot.y;
        self.width = snapshot.width;
        self.height = snapshot.height;
        self.flipped = snapshot.flipped;
        self.vy = snapshot.vy;
        self.controls = snapshot.controls.clone();
        self.state = snapshot.state;
        self.inventory = snapshot.inventory.clone();
        self.held = snapshot.held;
        self.owner = snapshot.owner;
        self.sequence = snapshot.sequence;
    }

    pub fn info(&self) -> MobInfo {
        MobInfo {
            id: self.id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            vy: self.vy,
            state: self.state,
            is_player: self.is_player(),
        }
    }

    pub(crate) fn handle(&self) -> MobHandle {
        MobHandle::new(
            self.id,
            self.x,
            self.y,
            self.width,
            self.height,
            self.state,
            self.vy,
            self.controls.clone(),
        )
    }

    pub fn held_item(&self) -> Option<&ItemStack> {
        self.inventory.get(self.held)
    }

    /// Add to an existing stack of the same item or start a new one
    pub fn give(&mut self, stack: ItemStack) {
        if stack.count == 0 {
            return;
        }
        match self.inventory.iter_mut().find(|s| s.item == stack.item) {
            Some(existing) => existing.count += stack.count,
            None => self.inventory.push(stack),
        }
    }

    /// Use up one of the held item
    pub fn consume_held(&mut self) -> Option<String> {
        let slot = self.inventory.get_mut(self.held)?;
        let item = slot.item.clone();
        slot.count = slot.count.saturating_sub(1);
        if slot.count == 0 {
            self.inventory.remove(self.held);
            if self.held > 0 && self.held >= self.inventory.len() {
                self.held = self.inventory.len().saturating_sub(1);
            }
        }
        Some(item)
    }
}
