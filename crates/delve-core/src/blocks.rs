//! Block and tool registries.
//!
//! Both tables are plain services owned by the world and lent to extensions
//! during dispatch. Registration always replaces: the last extension to
//! register an id wins, and the replaced entry's image and tool keys are
//! dropped from the secondary indexes.

use crate::types::{Layer, TileId, EMPTY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A delayed effect started when a block is placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    pub ticks: u32,
    pub effect: String,
}

/// Marks a block as a portal to another world
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSpec {
    pub default_destination: Option<String>,
}

/// Immutable attributes of a tile id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDef {
    pub sprite: String,
    pub blocks_movement: bool,
    /// One-way platform: solid only for mobs falling onto its top quarter
    pub blocks_when_falling: bool,
    pub blocks_discovery: bool,
    /// Digging the foreground leaves the same tile in an empty background
    pub leaves_background_copy: bool,
    pub blocks_light: bool,
    pub is_ladder: bool,
    /// Removed when the tile below stops blocking movement
    pub needs_ground_below: bool,
    pub light_emitting: bool,
    pub timer: Option<TimerSpec>,
    pub portal: Option<PortalSpec>,
    pub background_placement_disabled: bool,
    /// Image of the tool that places this block
    pub tool_image: Option<String>,
    /// Identifier of the tool (and item) that places this block
    pub tool_id: Option<String>,
}

impl BlockDef {
    /// Opaque, solid terrain such as dirt and stone
    pub fn solid(sprite: &str) -> Self {
        Self {
            sprite: sprite.to_string(),
            blocks_movement: true,
            blocks_discovery: true,
            blocks_light: true,
            leaves_background_copy: true,
            tool_image: Some(format!("{sprite}.png")),
            tool_id: Some(sprite.to_string()),
            ..Default::default()
        }
    }

    /// Non-colliding decoration
    pub fn decoration(sprite: &str) -> Self {
        Self {
            sprite: sprite.to_string(),
            tool_image: Some(format!("{sprite}.png")),
            tool_id: Some(sprite.to_string()),
            ..Default::default()
        }
    }
}

/// Tile id used for reads beside and below the world
pub const BOUNDARY_TILE: TileId = 4;

pub mod ids {
    use crate::types::TileId;

    pub const DIRT: TileId = 1;
    pub const GRASS: TileId = 2;
    pub const STONE: TileId = 3;
    pub const BEDROCK: TileId = super::BOUNDARY_TILE;
    pub const WOOD: TileId = 5;
    pub const LEAVES: TileId = 6;
    pub const LADDER: TileId = 7;
    pub const PLATFORM: TileId = 8;
    pub const TORCH: TileId = 9;
    pub const GLASS: TileId = 10;
    pub const SAPLING: TileId = 11;
    pub const TNT: TileId = 12;
    pub const PORTAL: TileId = 13;
    pub const LAMP: TileId = 14;
}

#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    blocks: HashMap<TileId, BlockDef>,
    by_image: HashMap<String, TileId>,
    by_tool: HashMap<String, TileId>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in palette
    pub fn standard() -> Self {
        let mut registry = Self::new();

        registry.register(ids::DIRT, BlockDef::solid("dirt"));
        registry.register(ids::GRASS, BlockDef::solid("grass"));
        registry.register(ids::STONE, BlockDef::solid("stone"));
        registry.register(
            ids::BEDROCK,
            BlockDef {
                leaves_background_copy: false,
                tool_image: None,
                tool_id: None,
                ..BlockDef::solid("bedrock")
            },
        );
        registry.register(ids::WOOD, BlockDef::decoration("wood"));
        registry.register(ids::LEAVES, BlockDef::decoration("leaves"));
        registry.register(
            ids::LADDER,
            BlockDef {
                is_ladder: true,
                ..BlockDef::decoration("ladder")
            },
        );
        registry.register(
            ids::PLATFORM,
            BlockDef {
                blocks_when_falling: true,
                ..BlockDef::decoration("platform")
            },
        );
        registry.register(
            ids::TORCH,
            BlockDef {
                light_emitting: true,
                needs_ground_below: true,
                background_placement_disabled: true,
                ..BlockDef::decoration("torch")
            },
        );
        registry.register(
            ids::GLASS,
            BlockDef {
                blocks_movement: true,
                ..BlockDef::decoration("glass")
            },
        );
        registry.register(
            ids::SAPLING,
            BlockDef {
                needs_ground_below: true,
                background_placement_disabled: true,
                timer: Some(TimerSpec {
                    ticks: 600,
                    effect: "grow".to_string(),
                }),
                ..BlockDef::decoration("sapling")
            },
        );
        registry.register(
            ids::TNT,
            BlockDef {
                timer: Some(TimerSpec {
                    ticks: 90,
                    effect: "explode".to_string(),
                }),
                leaves_background_copy: false,
                ..BlockDef::solid("tnt")
            },
        );
        registry.register(
            ids::PORTAL,
            BlockDef {
                portal: Some(PortalSpec::default()),
                background_placement_disabled: true,
                ..BlockDef::decoration("portal")
            },
        );
        registry.register(
            ids::LAMP,
            BlockDef {
                light_emitting: true,
                leaves_background_copy: false,
                ..BlockDef::solid("lamp")
            },
        );

        registry
    }

    /// Register a block, replacing whatever was registered under `id`.
    ///
    /// Returns false when `id` is the reserved empty tile.
    pub fn register(&mut self, id: TileId, def: BlockDef) -> bool {
        if id == EMPTY {
            warn!("Refusing to register a definition for the empty tile");
            return false;
        }

        self.remove(id);

        if let Some(image) = &def.tool_image {
            self.by_image.insert(image.clone(), id);
        }
        if let Some(tool) = &def.tool_id {
            self.by_tool.insert(tool.clone(), id);
        }

        debug!(block_id = id, sprite = %def.sprite, "Registered block");
        self.blocks.insert(id, def);
        true
    }

    pub fn lookup(&self, id: TileId) -> Option<&BlockDef> {
        if id == EMPTY {
            return None;
        }
        self.blocks.get(&id)
    }

    pub fn remove(&mut self, id: TileId) -> Option<BlockDef> {
        let def = self.blocks.remove(&id)?;

        if let Some(image) = &def.tool_image {
            if self.by_image.get(image) == Some(&id) {
                self.by_image.remove(image);
            }
        }
        if let Some(tool) = &def.tool_id {
            if self.by_tool.get(tool) == Some(&id) {
                self.by_tool.remove(tool);
            }
        }

        Some(def)
    }

    pub fn remove_by_image(&mut self, image: &str) -> Option<TileId> {
        let id = *self.by_image.get(image)?;
        self.remove(id).map(|_| id)
    }

    pub fn remove_by_tool(&mut self, tool_id: &str) -> Option<TileId> {
        let id = *self.by_tool.get(tool_id)?;
        self.remove(id).map(|_| id)
    }

    pub fn id_for_tool(&self, tool_id: &str) -> Option<TileId> {
        self.by_tool.get(tool_id).copied()
    }

    pub fn id_for_image(&self, image: &str) -> Option<TileId> {
        self.by_image.get(image).copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &BlockDef)> + '_ {
        self.blocks.iter().map(|(id, def)| (*id, def))
    }

    pub fn blocks_movement(&self, id: TileId) -> bool {
        self.lookup(id).map_or(false, |def| def.blocks_movement)
    }

    pub fn blocks_light(&self, id: TileId) -> bool {
        self.lookup(id).map_or(false, |def| def.blocks_light)
    }

    pub fn is_ladder(&self, id: TileId) -> bool {
        self.lookup(id).map_or(false, |def| def.is_ladder)
    }

    pub fn is_platform(&self, id: TileId) -> bool {
        self.lookup(id)
            .map_or(false, |def| def.blocks_when_falling && !def.blocks_movement)
    }
}

/// What a tool does to its target tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolAction {
    Dig,
    Place { tile: TileId, layer: Layer },
    Trigger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDef {
    pub id: String,
    pub image: String,
    pub action: ToolAction,
    /// Ticks of continuous use before the action completes
    pub delay: u32,
}

/// Tools keyed by identifier; inventory items resolve to the tool of the same name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digging tools plus one placing tool per block that names a tool id
    pub fn standard(blocks: &BlockRegistry) -> Self {
        let mut registry = Self::new();

        registry.register(ToolDef {
            id: "pickaxe".to_string(),
            image: "pickaxe.png".to_string(),
            action: ToolAction::Dig,
            delay: 10,
        });
        registry.register(ToolDef {
            id: "shovel".to_string(),
            image: "shovel.png".to_string(),
            action: ToolAction::Dig,
            delay: 20,
        });

        for (id, def) in blocks.iter() {
            if let Some(tool_id) = &def.tool_id {
                registry.register(ToolDef {
                    id: tool_id.clone(),
                    image: def.tool_image.clone().unwrap_or_default(),
                    action: ToolAction::Place {
                        tile: id,
                        layer: Layer::Foreground,
                    },
                    delay: 3,
                });
            }
        }

        registry
    }

    pub fn register(&mut self, tool: ToolDef) {
        debug!(tool_id = %tool.id, "Registered tool");
        self.tools.insert(tool.id.clone(), tool);
    }

    pub fn get(&self, id: &str) -> Option<&ToolDef> {
        self.tools.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ToolDef> {
        self.tools.remove(id)
    }

    pub fn remove_by_image(&mut self, image: &str) -> Vec<ToolDef> {
        let ids: Vec<String> = self
            .tools
            .values()
            .filter(|tool| tool.image == image)
            .map(|tool| tool.id.clone())
            .collect();

        ids.iter().filter_map(|id| self.tools.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_unknown_have_no_definition() {
        let registry = BlockRegistry::standard();
        assert!(registry.lookup(EMPTY).is_none());
        assert!(registry.lookup(200).is_none());
        assert!(!registry.blocks_movement(200));
    }

    #[test]
    fn test_register_empty_is_refused() {
        let mut registry = BlockRegistry::new();
        assert!(!registry.register(EMPTY, BlockDef::solid("air")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = BlockRegistry::new();
        registry.register(40, BlockDef::solid("marble"));
        registry.register(
            40,
            BlockDef {
                tool_id: Some("granite".to_string()),
                tool_image: Some("granite.png".to_string()),
                ..BlockDef::solid("granite")
            },
        );

        assert_eq!(registry.lookup(40).unwrap().sprite, "granite");
        assert_eq!(registry.id_for_tool("marble"), None);
        assert_eq!(registry.id_for_tool("granite"), Some(40));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_by_each_key() {
        let mut registry = BlockRegistry::standard();

        assert_eq!(registry.remove_by_image("dirt.png"), Some(ids::DIRT));
        assert!(registry.lookup(ids::DIRT).is_none());
        assert_eq!(registry.id_for_tool("dirt"), None);

        assert_eq!(registry.remove_by_tool("stone"), Some(ids::STONE));
        assert!(registry.lookup(ids::STONE).is_none());
        assert_eq!(registry.id_for_image("stone.png"), None);

        assert!(registry.remove(ids::GLASS).is_some());
        assert!(registry.remove(ids::GLASS).is_none());
        assert_eq!(registry.remove_by_tool("nothing"), None);
    }

    #[test]
    fn test_replaced_index_key_survives_removal_of_old_owner() {
        let mut registry = BlockRegistry::new();
        registry.register(40, BlockDef::solid("marble"));
        registry.register(41, BlockDef::solid("marble"));

        // 41 took over the "marble" keys; removing 40 must not drop them.
        registry.remove(40);
        assert_eq!(registry.id_for_tool("marble"), Some(41));
    }

    #[test]
    fn test_standard_tools() {
        let blocks = BlockRegistry::standard();
        let tools = ToolRegistry::standard(&blocks);

        assert_eq!(tools.get("pickaxe").unwrap().action, ToolAction::Dig);
        assert_eq!(
            tools.get("torch").unwrap().action,
            ToolAction::Place {
                tile: ids::TORCH,
                layer: Layer::Foreground
            }
        );
        assert!(tools.get("bedrock").is_none());
    }

    #[test]
    fn test_platform_classification() {
        let registry = BlockRegistry::standard();
        assert!(registry.is_platform(ids::PLATFORM));
        assert!(!registry.is_platform(ids::DIRT));
        assert!(registry.is_ladder(ids::LADDER));
    }
}
