//! Light propagation.
//!
//! Sky light falls straight down each column until the first light-blocking
//! foreground tile, emitters light their own cell fully, and everything then
//! spreads through an 8-neighbour flood fill that loses a fixed amount per
//! step. Cells that block light can be lit but never pass light on.

use crate::grid::TileGrid;
use delve_core::{BlockRegistry, Direction};
use std::collections::VecDeque;

pub const ORTHOGONAL_COST: f32 = 0.05;
pub const DIAGONAL_COST: f32 = 0.1;

fn is_emitter(grid: &TileGrid, blocks: &BlockRegistry, index: usize) -> bool {
    [grid.foreground[index], grid.background[index]]
        .into_iter()
        .any(|tile| blocks.lookup(tile).is_some_and(|def| def.light_emitting))
}

/// Rebuild the whole light map from scratch
pub fn recompute(grid: &mut TileGrid, blocks: &BlockRegistry) {
    grid.light.fill(0.0);

    for x in 0..grid.width() {
        for y in 0..grid.depth() {
            let index = (x + y * grid.width()) as usize;
            if blocks.blocks_light(grid.foreground[index]) {
                break;
            }
            grid.light[index] = 1.0;
        }
    }

    for index in 0..grid.len() {
        if is_emitter(grid, blocks, index) {
            grid.light[index] = 1.0;
        }
    }

    let seeds: VecDeque<usize> = (0..grid.len()).filter(|&i| grid.light[i] > 0.0).collect();
    flood(grid, blocks, seeds);
}

/// Spread `level` outward from one cell.
///
/// Without `force` the seed only takes the level if it is brighter than what
/// the cell already has; with `force` it is written unconditionally.
pub fn propagate_from(grid: &mut TileGrid, blocks: &BlockRegistry, x: i32, y: i32, level: f32, force: bool) {
    let Some(index) = grid.index(x, y) else {
        return;
    };
    let level = level.clamp(0.0, 1.0);
    if !force && level <= grid.light[index] {
        return;
    }
    grid.light[index] = level;
    flood(grid, blocks, VecDeque::from([index]));
}

fn flood(grid: &mut TileGrid, blocks: &BlockRegistry, mut queue: VecDeque<usize>) {
    while let Some(index) = queue.pop_front() {
        let level = grid.light[index];
        if level <= 0.0 {
            continue;
        }
        if blocks.blocks_light(grid.foreground[index]) && !is_emitter(grid, blocks, index) {
            continue;
        }

        let pos = grid.position(index);
        for direction in Direction::all() {
            let (dx, dy) = direction.to_delta();
            let Some(neighbour) = grid.index(pos.x + dx, pos.y + dy) else {
                continue;
            };
            let cost = if direction.is_diagonal() {
                DIAGONAL_COST
            } else {
                ORTHOGONAL_COST
            };
            let incoming = level - cost;
            if incoming > 0.0 && incoming > grid.light[neighbour] {
                grid.light[neighbour] = incoming;
                queue.push_back(neighbour);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::blocks::ids;
    use delve_core::Layer;
    use proptest::prelude::*;

    fn enclosed_torch(with_torch: bool) -> TileGrid {
        let mut grid = TileGrid::new(10, 10);
        for x in 4..=6 {
            for y in 4..=6 {
                grid.write(x, y, Layer::Foreground, ids::STONE);
            }
        }
        let centre = if with_torch { ids::TORCH } else { 0 };
        grid.write(5, 5, Layer::Foreground, centre);
        grid
    }

    #[test]
    fn test_open_sky_is_fully_lit() {
        let blocks = BlockRegistry::standard();
        let mut grid = TileGrid::new(6, 6);
        recompute(&mut grid, &blocks);
        assert!(grid.light.iter().all(|&level| level == 1.0));
    }

    #[test]
    fn test_light_decays_under_cover() {
        let blocks = BlockRegistry::standard();
        let mut grid = TileGrid::new(12, 6);
        for x in 0..12 {
            grid.write(x, 1, Layer::Foreground, ids::STONE);
        }
        grid.write(0, 1, Layer::Foreground, 0);
        recompute(&mut grid, &blocks);

        assert_eq!(grid.light_level(0, 2), 1.0);
        assert!((grid.light_level(1, 2) - 0.95).abs() < 1e-5);
        assert!((grid.light_level(2, 2) - 0.9).abs() < 1e-5);
        assert!(grid.light_level(8, 5) < grid.light_level(2, 5));
        // The roof is lit from above but only the opening lights the cave.
        assert!((grid.light_level(5, 1) - 0.95).abs() < 1e-5);
        assert!((grid.light_level(5, 2) - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_enclosed_emitter_does_not_leak() {
        let blocks = BlockRegistry::standard();

        let mut lit = enclosed_torch(true);
        recompute(&mut lit, &blocks);
        let mut dark = enclosed_torch(false);
        recompute(&mut dark, &blocks);

        assert_eq!(lit.light_level(5, 5), 1.0);
        for x in 3..=7 {
            for y in 3..=7 {
                let on_ring_or_inside = (4..=6).contains(&x) && (4..=6).contains(&y);
                if !on_ring_or_inside {
                    assert_eq!(lit.light_level(x, y), dark.light_level(x, y), "({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn test_propagate_from_respects_force() {
        let blocks = BlockRegistry::standard();
        let mut grid = TileGrid::new(8, 8);

        propagate_from(&mut grid, &blocks, 4, 4, 0.5, false);
        assert_eq!(grid.light_level(4, 4), 0.5);
        assert!((grid.light_level(5, 4) - 0.45).abs() < 1e-6);

        propagate_from(&mut grid, &blocks, 4, 4, 0.2, false);
        assert_eq!(grid.light_level(4, 4), 0.5);

        propagate_from(&mut grid, &blocks, 4, 4, 0.2, true);
        assert_eq!(grid.light_level(4, 4), 0.2);
    }

    proptest! {
        #[test]
        fn prop_recompute_is_idempotent(cells in proptest::collection::vec(0u8..15, 16 * 12)) {
            let blocks = BlockRegistry::standard();
            let mut grid = TileGrid::from_layers(16, 12, cells, vec![0; 16 * 12]).unwrap();

            recompute(&mut grid, &blocks);
            let first = grid.light.clone();
            recompute(&mut grid, &blocks);

            prop_assert_eq!(first.clone(), grid.light.clone());
            prop_assert!(first.iter().all(|&level| (0.0..=1.0).contains(&level)));
        }
    }
}
