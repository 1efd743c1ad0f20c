//! Map serialization.
//!
//! Current format: a `0xFF` marker, the metadata length as a big-endian
//! u16, UTF-8 JSON metadata, then one byte per cell for the foreground
//! followed by the background. Older saves are just the two layers and are
//! recognised by their exact length for the expected dimensions.

use crate::grid::{Portal, TileGrid};
use crate::timers::Timer;
use delve_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const FORMAT_MARKER: u8 = 0xFF;

#[derive(Debug, Serialize, Deserialize)]
struct MapHeader {
    width: i32,
    depth: i32,
    #[serde(default)]
    timers: Vec<Timer>,
    #[serde(default)]
    portals: Vec<Portal>,
}

pub fn serialize_map(grid: &TileGrid) -> Result<Vec<u8>> {
    let header = MapHeader {
        width: grid.width(),
        depth: grid.depth(),
        timers: grid.metadata.timers.clone(),
        portals: grid.metadata.portals.clone(),
    };
    let json = serde_json::to_vec(&header)?;
    let length = u16::try_from(json.len()).map_err(|_| {
        Error::Serialization(format!("map metadata too large: {} bytes", json.len()))
    })?;

    let mut bytes = Vec::with_capacity(3 + json.len() + grid.len() * 2);
    bytes.push(FORMAT_MARKER);
    bytes.extend_from_slice(&length.to_be_bytes());
    bytes.extend_from_slice(&json);
    bytes.extend_from_slice(&grid.foreground);
    bytes.extend_from_slice(&grid.background);
    Ok(bytes)
}

/// Decode a map. `width` and `depth` are only used to recognise the legacy
/// layout; current saves carry their own dimensions.
///
/// A leading marker is tried as the current format first. Only when that
/// fails does a payload of exactly the legacy length fall back to it.
pub fn deserialize_map(bytes: &[u8], width: i32, depth: i32) -> Result<TileGrid> {
    let legacy_cells = (width.max(0) as usize) * (depth.max(0) as usize);
    let legacy = legacy_cells > 0 && bytes.len() == legacy_cells * 2;

    if let Some((&FORMAT_MARKER, rest)) = bytes.split_first() {
        match deserialize_current(rest) {
            Ok(grid) => return Ok(grid),
            Err(e) if !legacy => return Err(e),
            Err(_) => {}
        }
    }

    if legacy {
        let (foreground, background) = bytes.split_at(legacy_cells);
        return TileGrid::from_layers(width, depth, foreground.to_vec(), background.to_vec());
    }

    Err(Error::MalformedWorld(format!(
        "unrecognised map of {} bytes",
        bytes.len()
    )))
}

fn deserialize_current(rest: &[u8]) -> Result<TileGrid> {
    if rest.len() < 2 {
        return Err(Error::MalformedWorld("truncated metadata length".to_string()));
    }
    let length = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    let rest = &rest[2..];
    if rest.len() < length {
        return Err(Error::MalformedWorld("truncated metadata".to_string()));
    }
    let (json, cells) = rest.split_at(length);
    let header: MapHeader = serde_json::from_slice(json)
        .map_err(|e| Error::MalformedWorld(format!("bad metadata: {}", e)))?;

    if header.width <= 0 || header.depth <= 0 {
        return Err(Error::MalformedWorld(format!(
            "invalid dimensions {}x{}",
            header.width, header.depth
        )));
    }
    let size = header.width as usize * header.depth as usize;
    if cells.len() != size * 2 {
        return Err(Error::MalformedWorld(format!(
            "expected {} cell bytes, got {}",
            size * 2,
            cells.len()
        )));
    }

    let (foreground, background) = cells.split_at(size);
    let mut grid = TileGrid::from_layers(
        header.width,
        header.depth,
        foreground.to_vec(),
        background.to_vec(),
    )?;
    grid.metadata.timers = header
        .timers
        .into_iter()
        .filter(|timer| timer.index < size)
        .collect();
    grid.metadata.portals = header
        .portals
        .into_iter()
        .filter(|portal| portal.index < size)
        .collect();
    Ok(grid)
}
