//! Fog-of-war reveal.

use crate::grid::TileGrid;
use delve_core::{BlockRegistry, Direction};

fn stops_discovery(grid: &TileGrid, blocks: &BlockRegistry, index: usize) -> bool {
    blocks
        .lookup(grid.foreground[index])
        .is_some_and(|def| def.blocks_movement && def.blocks_discovery)
}

/// Reveal the open region connected to `(x, y)`, returning how many cells
/// became discovered.
///
/// Walls bounding the region are revealed but not expanded through. Without
/// `force` a seed that is already discovered does nothing.
pub fn reveal(grid: &mut TileGrid, blocks: &BlockRegistry, x: i32, y: i32, force: bool) -> usize {
    let Some(seed) = grid.index(x, y) else {
        return 0;
    };
    if !force && grid.discovered[seed] {
        return 0;
    }

    let mut revealed = 0;
    if !grid.discovered[seed] {
        grid.discovered[seed] = true;
        revealed += 1;
    }

    let mut stack = vec![seed];
    while let Some(index) = stack.pop() {
        if stops_discovery(grid, blocks, index) {
            continue;
        }

        let pos = grid.position(index);
        for direction in Direction::all() {
            let (dx, dy) = direction.to_delta();
            let Some(neighbour) = grid.index(pos.x + dx, pos.y + dy) else {
                continue;
            };
            if !grid.discovered[neighbour] {
                grid.discovered[neighbour] = true;
                revealed += 1;
                stack.push(neighbour);
            }
        }
    }

    revealed
}
