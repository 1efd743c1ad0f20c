//! Seeded terrain generation.

use crate::grid::TileGrid;
use delve_core::blocks::ids;
use delve_core::{Layer, TilePos, WorldConfig, EMPTY};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

const DIRT_DEPTH: i32 = 6;
const TRUNK_HEIGHT: i32 = 4;
const CAVE_WORM_LENGTH: usize = 40;

/// Fill `grid` with terrain and return the spawn tile (the air cell just
/// above the surface in the middle column).
pub fn generate(grid: &mut TileGrid, config: &WorldConfig, seed: u64) -> TilePos {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let width = grid.width();
    let depth = grid.depth();
    grid.reset();

    let lowest_surface = (depth - 3).max(1);
    let mut surface = config.surface_row.clamp(1, lowest_surface);
    let mut heights = Vec::with_capacity(width as usize);

    for x in 0..width {
        surface = (surface + rng.gen_range(-1..=1))
            .clamp(config.surface_row - 8, config.surface_row + 8)
            .clamp(1, lowest_surface);
        heights.push(surface);

        for y in surface..depth {
            let tile = if y == depth - 1 {
                ids::BEDROCK
            } else if y == surface {
                ids::GRASS
            } else if y < surface + DIRT_DEPTH {
                ids::DIRT
            } else {
                ids::STONE
            };
            grid.write(x, y, Layer::Foreground, tile);
            if y > surface {
                let wall = if y < surface + DIRT_DEPTH { ids::DIRT } else { ids::STONE };
                grid.write(x, y, Layer::Background, wall);
            }
        }
    }

    carve_caves(grid, config, &heights, &mut rng);

    let spawn_x = width / 2;
    let spawn = TilePos::new(spawn_x, heights[spawn_x as usize] - 1);
    plant_trees(grid, config, &heights, spawn_x, &mut rng);

    debug!(seed, width, depth, spawn_x = spawn.x, spawn_y = spawn.y, "Generated world");
    spawn
}

fn carve_caves(grid: &mut TileGrid, config: &WorldConfig, heights: &[i32], rng: &mut ChaCha8Rng) {
    let area = (grid.width() * grid.depth()) as f32;
    let worms = (area * config.cave_density / CAVE_WORM_LENGTH as f32) as usize;
    let floor = grid.depth() - 1;
    if floor < 3 {
        return;
    }

    for _ in 0..worms {
        let mut x = rng.gen_range(0..grid.width());
        let top = heights[x as usize] + 4;
        if top >= floor {
            continue;
        }
        let mut y = rng.gen_range(top..floor);

        for _ in 0..CAVE_WORM_LENGTH {
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (cx, cy) = (x + dx, y + dy);
                if grid.in_bounds(cx, cy) && cy < floor && cy > heights[cx as usize] + 2 {
                    grid.write(cx, cy, Layer::Foreground, EMPTY);
                }
            }
            x = (x + rng.gen_range(-1..=1)).clamp(0, grid.width() - 1);
            y = (y + rng.gen_range(-1..=1)).clamp(1, floor - 1);
        }
    }
}

fn plant_trees(
    grid: &mut TileGrid,
    config: &WorldConfig,
    heights: &[i32],
    spawn_x: i32,
    rng: &mut ChaCha8Rng,
) {
    let mut x = 2;
    while x < grid.width() - 2 {
        if (x - spawn_x).abs() > 3 && rng.gen::<f32>() < config.tree_density {
            let ground = heights[x as usize];
            let top = ground - TRUNK_HEIGHT;
            if top > 1 {
                for y in top..ground {
                    grid.write(x, y, Layer::Foreground, ids::WOOD);
                }
                for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (-1, -1), (1, -1)] {
                    let (lx, ly) = (x + dx, top + dy);
                    if grid.get_tile(lx, ly, Layer::Foreground) == EMPTY {
                        grid.write(lx, ly, Layer::Foreground, ids::LEAVES);
                    }
                }
                x += 3;
                continue;
            }
        }
        x += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> WorldConfig {
        WorldConfig {
            width: 64,
            depth: 48,
            surface_row: 12,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_seed_same_world() {
        let config = small_config();
        let mut a = TileGrid::new(config.width, config.depth);
        let mut b = TileGrid::new(config.width, config.depth);

        let spawn_a = generate(&mut a, &config, 7);
        let spawn_b = generate(&mut b, &config, 7);

        assert_eq!(spawn_a, spawn_b);
        assert_eq!(a.layer(Layer::Foreground), b.layer(Layer::Foreground));
        assert_eq!(a.layer(Layer::Background), b.layer(Layer::Background));
    }

    #[test]
    fn test_layout() {
        let config = small_config();
        let mut grid = TileGrid::new(config.width, config.depth);
        let spawn = generate(&mut grid, &config, 99);

        for x in 0..config.width {
            assert_eq!(grid.get_tile(x, 0, Layer::Foreground), EMPTY);
            assert_eq!(grid.get_tile(x, config.depth - 1, Layer::Foreground), ids::BEDROCK);
        }
        assert_eq!(grid.get_tile(spawn.x, spawn.y, Layer::Foreground), EMPTY);
        assert_eq!(grid.get_tile(spawn.x, spawn.y + 1, Layer::Foreground), ids::GRASS);
    }
}
