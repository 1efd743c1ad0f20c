//! Execution context handed to an extension for one hook invocation.

use crate::brain::Brain;
use crate::bundle::ModBundle;
use delve_core::blocks::BOUNDARY_TILE;
use delve_core::{
    BlockRegistry, Controls, ItemStack, Layer, MobId, MobState, Result, TileId, ToolRegistry,
    EMPTY,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Public facts about a mob, as seen by extensions
#[derive(Debug, Clone, PartialEq)]
pub struct MobInfo {
    pub id: MobId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub vy: f32,
    pub state: MobState,
    pub is_player: bool,
}

/// Copy of both tile layers, for extensions that cannot borrow the world
#[derive(Debug, Clone)]
pub struct TileSnapshot {
    pub width: i32,
    pub depth: i32,
    pub foreground: Vec<TileId>,
    pub background: Vec<TileId>,
}

impl TileSnapshot {
    /// Same sentinel rules as the live grid
    pub fn get(&self, x: i32, y: i32, layer: Layer) -> TileId {
        if x < 0 || x >= self.width || y >= self.depth {
            return BOUNDARY_TILE;
        }
        if y < 0 {
            return EMPTY;
        }
        let index = (x + y * self.width) as usize;
        match layer {
            Layer::Foreground => self.foreground[index],
            Layer::Background => self.background[index],
        }
    }
}

/// Read-only world access for extensions and brains
pub trait WorldQuery {
    fn tile(&self, x: i32, y: i32, layer: Layer) -> TileId;
    fn light_level(&self, x: i32, y: i32) -> f32;
    fn is_discovered(&self, x: i32, y: i32) -> bool;
    /// Width and depth in tiles
    fn dimensions(&self) -> (i32, i32);
    fn tile_size(&self) -> i32;
    fn tick(&self) -> u64;
    fn is_host(&self) -> bool;
    fn mob(&self, id: MobId) -> Option<MobInfo>;
    fn mobs(&self) -> Vec<MobInfo>;
    fn snapshot(&self) -> Arc<TileSnapshot>;
}

/// A mob an extension asks the world to create
pub struct MobSpawn {
    pub id: MobId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub brain: Option<Box<dyn Brain>>,
}

impl MobSpawn {
    pub fn new(name: impl Into<String>, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id: MobId::new(),
            name: name.into(),
            x,
            y,
            width,
            height,
            brain: None,
        }
    }

    pub fn with_brain(mut self, brain: Box<dyn Brain>) -> Self {
        self.brain = Some(brain);
        self
    }
}

/// A world mutation requested by an extension
pub enum ModCommand {
    SetTile {
        x: i32,
        y: i32,
        layer: Layer,
        tile: TileId,
    },
    SpawnMob(MobSpawn),
    RemoveMob(MobId),
    SetVelocity {
        mob: MobId,
        vy: f32,
    },
    Teleport {
        mob: MobId,
        x: f32,
        y: f32,
    },
    SetControls {
        mob: MobId,
        controls: Controls,
    },
    GiveItem {
        mob: MobId,
        item: ItemStack,
    },
    AttachBrain {
        mob: MobId,
        brain: Box<dyn Brain>,
    },
    SetPortalDestination {
        x: i32,
        y: i32,
        destination: Option<String>,
    },
    Chat {
        from: String,
        text: String,
    },
}

impl fmt::Debug for ModCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModCommand::SetTile { x, y, layer, tile } => {
                write!(f, "SetTile({x}, {y}, {layer:?}, {tile})")
            }
            ModCommand::SpawnMob(spawn) => write!(f, "SpawnMob({}, {})", spawn.name, spawn.id),
            ModCommand::RemoveMob(id) => write!(f, "RemoveMob({id})"),
            ModCommand::SetVelocity { mob, vy } => write!(f, "SetVelocity({mob}, {vy})"),
            ModCommand::Teleport { mob, x, y } => write!(f, "Teleport({mob}, {x}, {y})"),
            ModCommand::SetControls { mob, .. } => write!(f, "SetControls({mob})"),
            ModCommand::GiveItem { mob, item } => {
                write!(f, "GiveItem({mob}, {} x{})", item.item, item.count)
            }
            ModCommand::AttachBrain { mob, .. } => write!(f, "AttachBrain({mob})"),
            ModCommand::SetPortalDestination { x, y, destination } => {
                write!(f, "SetPortalDestination({x}, {y}, {destination:?})")
            }
            ModCommand::Chat { from, text } => write!(f, "Chat({from}: {text})"),
        }
    }
}

/// Services the world lends to the sandbox for one dispatch
pub struct Services<'a> {
    pub blocks: &'a mut BlockRegistry,
    pub tools: &'a mut ToolRegistry,
    pub world: &'a dyn WorldQuery,
}

/// Capability object bound to a single extension
pub struct ModContext<'a> {
    name: &'a str,
    bundle: &'a ModBundle,
    blocks: &'a mut BlockRegistry,
    tools: &'a mut ToolRegistry,
    world: &'a dyn WorldQuery,
    commands: &'a mut Vec<ModCommand>,
}

impl<'a> ModContext<'a> {
    pub fn new(
        name: &'a str,
        bundle: &'a ModBundle,
        blocks: &'a mut BlockRegistry,
        tools: &'a mut ToolRegistry,
        world: &'a dyn WorldQuery,
        commands: &'a mut Vec<ModCommand>,
    ) -> Self {
        Self {
            name,
            bundle,
            blocks,
            tools,
            world,
            commands,
        }
    }

    /// Name of the extension this context is bound to
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn world(&self) -> &dyn WorldQuery {
        self.world
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &*self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockRegistry {
        &mut *self.blocks
    }

    pub fn tools(&self) -> &ToolRegistry {
        &*self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut *self.tools
    }

    /// Looks up a resource in this extension's own bundle
    pub fn resource(&self, path: &str) -> Option<&[u8]> {
        self.bundle.resource(path)
    }

    pub fn resource_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let bytes = self
            .bundle
            .resource(path)
            .ok_or_else(|| delve_core::Error::NotFound(format!("{}:{}", self.name, path)))?;
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn push(&mut self, command: ModCommand) {
        self.commands.push(command);
    }

    pub fn set_tile(&mut self, x: i32, y: i32, layer: Layer, tile: TileId) {
        self.push(ModCommand::SetTile { x, y, layer, tile });
    }

    pub fn spawn_mob(&mut self, spawn: MobSpawn) -> MobId {
        let id = spawn.id;
        self.push(ModCommand::SpawnMob(spawn));
        id
    }

    /// Chat lines are attributed to the calling extension
    pub fn chat(&mut self, text: impl Into<String>) {
        let from = self.name.to_string();
        self.push(ModCommand::Chat {
            from,
            text: text.into(),
        });
    }

    pub fn log(&self, message: &str) {
        info!(extension = %self.name, "{}", message);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A world with nothing in it, for tests that only need the trait
    pub(crate) struct EmptyWorld;

    impl WorldQuery for EmptyWorld {
        fn tile(&self, _x: i32, _y: i32, _layer: Layer) -> TileId {
            EMPTY
        }
        fn light_level(&self, _x: i32, _y: i32) -> f32 {
            1.0
        }
        fn is_discovered(&self, _x: i32, _y: i32) -> bool {
            true
        }
        fn dimensions(&self) -> (i32, i32) {
            (4, 4)
        }
        fn tile_size(&self) -> i32 {
            32
        }
        fn tick(&self) -> u64 {
            0
        }
        fn is_host(&self) -> bool {
            true
        }
        fn mob(&self, _id: MobId) -> Option<MobInfo> {
            None
        }
        fn mobs(&self) -> Vec<MobInfo> {
            Vec::new()
        }
        fn snapshot(&self) -> Arc<TileSnapshot> {
            Arc::new(TileSnapshot {
                width: 4,
                depth: 4,
                foreground: vec![EMPTY; 16],
                background: vec![EMPTY; 16],
            })
        }
    }

    #[test]
    fn test_snapshot_sentinels() {
        let snapshot = EmptyWorld.snapshot();
        assert_eq!(snapshot.get(-1, 2, Layer::Foreground), BOUNDARY_TILE);
        assert_eq!(snapshot.get(2, 4, Layer::Foreground), BOUNDARY_TILE);
        assert_eq!(snapshot.get(2, -3, Layer::Background), EMPTY);
        assert_eq!(snapshot.get(-1, -3, Layer::Foreground), BOUNDARY_TILE);
        assert_eq!(snapshot.get(1, 1, Layer::Foreground), EMPTY);
    }

    #[test]
    fn test_chat_is_namespaced() {
        let mut bundle = ModBundle::new();
        bundle.insert("greeting.json", br#"{"text":"hi"}"#.to_vec());
        let mut blocks = BlockRegistry::new();
        let mut tools = ToolRegistry::new();
        let mut commands = Vec::new();

        {
            let mut ctx = ModContext::new(
                "greeter",
                &bundle,
                &mut blocks,
                &mut tools,
                &EmptyWorld,
                &mut commands,
            );
            let greeting: serde_json::Value = ctx.resource_json("greeting.json").unwrap();
            ctx.chat(greeting["text"].as_str().unwrap());
            assert!(ctx.resource_json::<serde_json::Value>("missing.json").is_err());
        }

        match &commands[0] {
            ModCommand::Chat { from, text } => {
                assert_eq!(from, "greeter");
                assert_eq!(text, "hi");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
