//! The closed set of extension hooks and the events they receive.

use delve_core::{Layer, MobId, TileId, TilePos};

/// Lifecycle and world hooks an extension may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Hook {
    GameStart,
    WorldStart,
    Tick,
    TileSet,
    ToolUse,
    ToolProgress,
    Trigger,
    StandOn,
    BlockedBy,
    HitHead,
    MobAdded,
    TimerFired,
}

impl Hook {
    pub const ALL: [Hook; 12] = [
        Hook::GameStart,
        Hook::WorldStart,
        Hook::Tick,
        Hook::TileSet,
        Hook::ToolUse,
        Hook::ToolProgress,
        Hook::Trigger,
        Hook::StandOn,
        Hook::BlockedBy,
        Hook::HitHead,
        Hook::MobAdded,
        Hook::TimerFired,
    ];

    fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Name of the function a WASM extension exports to implement this hook
    pub fn export_name(self) -> &'static str {
        match self {
            Hook::GameStart => "on_game_start",
            Hook::WorldStart => "on_world_start",
            Hook::Tick => "on_tick",
            Hook::TileSet => "on_tile_set",
            Hook::ToolUse => "on_tool_use",
            Hook::ToolProgress => "on_tool_progress",
            Hook::Trigger => "on_trigger",
            Hook::StandOn => "on_stand_on",
            Hook::BlockedBy => "on_blocked_by",
            Hook::HitHead => "on_hit_head",
            Hook::MobAdded => "on_mob_added",
            Hook::TimerFired => "on_timer_fired",
        }
    }
}

/// Capability set: which hooks an extension provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet(u16);

impl HookSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Hook::ALL.into_iter().collect()
    }

    pub fn with(mut self, hook: Hook) -> Self {
        self.insert(hook);
        self
    }

    pub fn insert(&mut self, hook: Hook) {
        self.0 |= hook.bit();
    }

    pub fn contains(&self, hook: Hook) -> bool {
        self.0 & hook.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        let mut set = HookSet::empty();
        for hook in iter {
            set.insert(hook);
        }
        set
    }
}

/// An event delivered to every extension providing its hook
#[derive(Debug, Clone, PartialEq)]
pub enum ModEvent {
    GameStart,
    WorldStart,
    Tick {
        tick: u64,
    },
    TileSet {
        pos: TilePos,
        layer: Layer,
        tile: TileId,
        previous: TileId,
    },
    ToolUse {
        mob: MobId,
        tool: String,
        pos: TilePos,
    },
    ToolProgress {
        mob: MobId,
        tool: String,
        pos: TilePos,
        /// Fraction of the tool delay accumulated so far
        progress: f32,
    },
    Trigger {
        mob: MobId,
        pos: TilePos,
        tile: TileId,
    },
    StandOn {
        mob: MobId,
        pos: TilePos,
        tile: TileId,
    },
    BlockedBy {
        mob: MobId,
        pos: TilePos,
        tile: TileId,
    },
    HitHead {
        mob: MobId,
        pos: TilePos,
        tile: TileId,
    },
    MobAdded {
        mob: MobId,
    },
    TimerFired {
        pos: TilePos,
        layer: Layer,
        effect: String,
    },
}

impl ModEvent {
    pub fn hook(&self) -> Hook {
        match self {
            ModEvent::GameStart => Hook::GameStart,
            ModEvent::WorldStart => Hook::WorldStart,
            ModEvent::Tick { .. } => Hook::Tick,
            ModEvent::TileSet { .. } => Hook::TileSet,
            ModEvent::ToolUse { .. } => Hook::ToolUse,
            ModEvent::ToolProgress { .. } => Hook::ToolProgress,
            ModEvent::Trigger { .. } => Hook::Trigger,
            ModEvent::StandOn { .. } => Hook::StandOn,
            ModEvent::BlockedBy { .. } => Hook::BlockedBy,
            ModEvent::HitHead { .. } => Hook::HitHead,
            ModEvent::MobAdded { .. } => Hook::MobAdded,
            ModEvent::TimerFired { .. } => Hook::TimerFired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_set_membership() {
        let set = HookSet::empty().with(Hook::Tick).with(Hook::TimerFired);
        assert!(set.contains(Hook::Tick));
        assert!(set.contains(Hook::TimerFired));
        assert!(!set.contains(Hook::GameStart));
        assert!(HookSet::empty().is_empty());
    }

    #[test]
    fn test_all_contains_every_hook() {
        let all = HookSet::all();
        assert!(Hook::ALL.iter().all(|hook| all.contains(*hook)));
    }

    #[test]
    fn test_event_hook_mapping() {
        assert_eq!(ModEvent::Tick { tick: 3 }.hook(), Hook::Tick);
        assert_eq!(
            ModEvent::TimerFired {
                pos: TilePos::new(1, 1),
                layer: Layer::Foreground,
                effect: "grow".to_string()
            }
            .hook(),
            Hook::TimerFired
        );
    }
}
