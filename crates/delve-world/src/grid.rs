//! Two-layer tile grid with per-cell light and discovery.

use delve_core::blocks::BOUNDARY_TILE;
use delve_core::{BlockRegistry, Error, Layer, Result, TileId, TilePos, EMPTY};
use serde::{Deserialize, Serialize};

use crate::timers::Timer;

/// A portal tile and where it leads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portal {
    pub index: usize,
    pub destination: Option<String>,
}

/// Per-cell state that outlives a single tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldMetadata {
    pub timers: Vec<Timer>,
    pub portals: Vec<Portal>,
}

impl WorldMetadata {
    /// Forget everything attached to a cell and layer that is being overwritten
    pub fn prune(&mut self, index: usize, layer: Layer) {
        self.timers
            .retain(|timer| !(timer.index == index && timer.layer == layer));
        if layer == Layer::Foreground {
            self.portals.retain(|portal| portal.index != index);
        }
    }

    pub fn portal(&self, index: usize) -> Option<&Portal> {
        self.portals.iter().find(|portal| portal.index == index)
    }

    pub fn portal_mut(&mut self, index: usize) -> Option<&mut Portal> {
        self.portals.iter_mut().find(|portal| portal.index == index)
    }
}

/// The world's tiles.
///
/// Cells are stored row-major (`x + y * width`). Reads outside the grid
/// never fail: the sides and everything below the floor read as solid
/// boundary, the sky above row 0 reads as empty, fully lit and discovered.
#[derive(Debug, Clone)]
pub struct TileGrid {
    width: i32,
    depth: i32,
    pub(crate) foreground: Vec<TileId>,
    pub(crate) background: Vec<TileId>,
    pub(crate) light: Vec<f32>,
    pub(crate) discovered: Vec<bool>,
    pub metadata: WorldMetadata,
}

impl TileGrid {
    pub fn new(width: i32, depth: i32) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);
        let size = (width * depth) as usize;
        Self {
            width,
            depth,
            foreground: vec![EMPTY; size],
            background: vec![EMPTY; size],
            light: vec![0.0; size],
            discovered: vec![false; size],
            metadata: WorldMetadata::default(),
        }
    }

    /// Build a grid from raw layers. Light and discovery start dark.
    pub fn from_layers(
        width: i32,
        depth: i32,
        foreground: Vec<TileId>,
        background: Vec<TileId>,
    ) -> Result<Self> {
        if width <= 0 || depth <= 0 {
            return Err(Error::MalformedWorld(format!(
                "invalid dimensions {}x{}",
                width, depth
            )));
        }
        let size = (width as usize) * (depth as usize);
        if foreground.len() != size || background.len() != size {
            return Err(Error::MalformedWorld(format!(
                "expected {} cells per layer, got {} and {}",
                size,
                foreground.len(),
                background.len()
            )));
        }

        Ok(Self {
            width,
            depth,
            foreground,
            background,
            light: vec![0.0; size],
            discovered: vec![false; size],
            metadata: WorldMetadata::default(),
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.foreground.len()
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_empty()
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.depth
    }

    pub fn index(&self, x: i32, y: i32) -> Option<usize> {
        self.in_bounds(x, y).then(|| (x + y * self.width) as usize)
    }

    pub fn position(&self, index: usize) -> TilePos {
        let index = index as i32;
        TilePos::new(index % self.width, index / self.width)
    }

    pub fn get_tile(&self, x: i32, y: i32, layer: Layer) -> TileId {
        if x < 0 || x >= self.width || y >= self.depth {
            return BOUNDARY_TILE;
        }
        if y < 0 {
            return EMPTY;
        }
        let index = (x + y * self.width) as usize;
        self.layer(layer)[index]
    }

    pub fn light_level(&self, x: i32, y: i32) -> f32 {
        match self.index(x, y) {
            Some(index) => self.light[index],
            None if y < 0 => 1.0,
            None => 0.0,
        }
    }

    pub fn is_discovered(&self, x: i32, y: i32) -> bool {
        match self.index(x, y) {
            Some(index) => self.discovered[index],
            None => y < 0,
        }
    }

    /// Whether the foreground at a cell stops mobs, boundary included
    pub fn is_blocking(&self, x: i32, y: i32, blocks: &BlockRegistry) -> bool {
        if !self.in_bounds(x, y) {
            return y >= 0;
        }
        blocks.blocks_movement(self.get_tile(x, y, Layer::Foreground))
    }

    pub fn layer(&self, layer: Layer) -> &[TileId] {
        match layer {
            Layer::Foreground => &self.foreground,
            Layer::Background => &self.background,
        }
    }

    /// Overwrite a cell, returning the previous tile.
    ///
    /// Metadata attached to the cell is pruned. Propagators are not rerun;
    /// callers that need lighting and discovery go through the world.
    pub fn write(&mut self, x: i32, y: i32, layer: Layer, tile: TileId) -> Option<TileId> {
        let index = self.index(x, y)?;
        let slot = match layer {
            Layer::Foreground => &mut self.foreground[index],
            Layer::Background => &mut self.background[index],
        };
        let previous = std::mem::replace(slot, tile);
        self.metadata.prune(index, layer);
        Some(previous)
    }

    /// Clear every layer, light, discovery and metadata
    pub fn reset(&mut self) {
        self.foreground.fill(EMPTY);
        self.background.fill(EMPTY);
        self.light.fill(0.0);
        self.discovered.fill(false);
        self.metadata = WorldMetadata::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::Timer;
    use delve_core::blocks::ids;
    use proptest::prelude::*;

    #[test]
    fn test_grid_creation() {
        let grid = TileGrid::new(10, 8);
        assert_eq!(grid.width(), 10);
        assert_eq!(grid.depth(), 8);
        assert_eq!(grid.len(), 80);
        assert_eq!(grid.get_tile(3, 3, Layer::Foreground), EMPTY);
    }

    #[test]
    fn test_index_roundtrip() {
        let grid = TileGrid::new(7, 5);
        let index = grid.index(3, 2).unwrap();
        assert_eq!(index, 17);
        assert_eq!(grid.position(index), TilePos::new(3, 2));
        assert_eq!(grid.index(7, 0), None);
    }

    #[test]
    fn test_write_returns_previous_and_prunes() {
        let mut grid = TileGrid::new(4, 4);
        let index = grid.index(1, 1).unwrap();
        grid.metadata.timers.push(Timer::new(index, Layer::Foreground, 5, "explode"));
        grid.metadata.timers.push(Timer::new(index, Layer::Background, 5, "grow"));
        grid.metadata.portals.push(Portal {
            index,
            destination: Some("elsewhere".to_string()),
        });

        assert_eq!(grid.write(1, 1, Layer::Foreground, ids::DIRT), Some(EMPTY));
        assert_eq!(grid.write(1, 1, Layer::Foreground, ids::STONE), Some(ids::DIRT));
        assert_eq!(grid.metadata.timers.len(), 1);
        assert_eq!(grid.metadata.timers[0].layer, Layer::Background);
        assert!(grid.metadata.portals.is_empty());

        assert_eq!(grid.write(-1, 1, Layer::Foreground, ids::STONE), None);
    }

    #[test]
    fn test_from_layers_rejects_wrong_size() {
        assert!(TileGrid::from_layers(2, 2, vec![0; 4], vec![0; 3]).is_err());
        assert!(TileGrid::from_layers(0, 2, vec![], vec![]).is_err());
        assert!(TileGrid::from_layers(2, 2, vec![1; 4], vec![0; 4]).is_ok());
    }

    #[test]
    fn test_boundary_blocks_movement() {
        let blocks = BlockRegistry::new();
        let grid = TileGrid::new(4, 4);
        assert!(grid.is_blocking(-1, 2, &blocks));
        assert!(grid.is_blocking(2, 4, &blocks));
        assert!(!grid.is_blocking(2, -1, &blocks));
        assert!(!grid.is_blocking(2, 2, &blocks));
    }

    proptest! {
        #[test]
        fn prop_out_of_range_reads_are_sentinels(x in -50i32..50, y in -50i32..50) {
            let grid = TileGrid::new(10, 10);
            prop_assume!(!grid.in_bounds(x, y));

            let tile = grid.get_tile(x, y, Layer::Foreground);
            if x < 0 || x >= 10 || y >= 10 {
                prop_assert_eq!(tile, BOUNDARY_TILE);
            } else {
                prop_assert_eq!(tile, EMPTY);
            }
            prop_assert_eq!(grid.get_tile(x, y, Layer::Background), tile);

            if y < 0 {
                prop_assert_eq!(grid.light_level(x, y), 1.0);
                prop_assert!(grid.is_discovered(x, y));
            } else {
                prop_assert_eq!(grid.light_level(x, y), 0.0);
                prop_assert!(!grid.is_discovered(x, y));
            }
        }
    }
}
