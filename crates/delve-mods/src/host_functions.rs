//! Host function implementations for the WASM extension ABI.

use crate::context::TileSnapshot;
use delve_core::Layer;
use std::sync::Arc;
use wasmtime::*;

/// A mutation requested from inside a WASM call, replayed onto the
/// extension's context once the call returns successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SetTile {
        x: i32,
        y: i32,
        layer: Layer,
        tile: u8,
    },
    SpawnMob {
        x: i32,
        y: i32,
    },
    Chat(String),
    Log(String),
}

/// Store data for one WASM extension
#[derive(Default)]
pub struct HostFunctions {
    /// Tiles visible to `get_tile` during the current call
    pub snapshot: Option<Arc<TileSnapshot>>,
    pub calls: Vec<HostCall>,
}

impl HostFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add host function imports to a linker
    pub fn add_to_linker(linker: &mut Linker<Self>) -> Result<(), anyhow::Error> {
        // get_tile: (x: i32, y: i32, layer: i32) -> i32
        linker.func_wrap(
            "env",
            "get_tile",
            |caller: Caller<'_, Self>, x: i32, y: i32, layer: i32| {
                let layer = Layer::from_index(layer as u8);
                caller
                    .data()
                    .snapshot
                    .as_ref()
                    .map_or(0, |tiles| tiles.get(x, y, layer) as i32)
            },
        )?;

        // set_tile: (x: i32, y: i32, layer: i32, tile: i32)
        linker.func_wrap(
            "env",
            "set_tile",
            |mut caller: Caller<'_, Self>, x: i32, y: i32, layer: i32, tile: i32| {
                let Ok(tile) = u8::try_from(tile) else {
                    return;
                };
                caller.data_mut().calls.push(HostCall::SetTile {
                    x,
                    y,
                    layer: Layer::from_index(layer as u8),
                    tile,
                });
            },
        )?;

        // spawn_mob: (x: i32, y: i32) in tile coordinates
        linker.func_wrap(
            "env",
            "spawn_mob",
            |mut caller: Caller<'_, Self>, x: i32, y: i32| {
                caller.data_mut().calls.push(HostCall::SpawnMob { x, y });
            },
        )?;

        // chat: (ptr: i32, len: i32)
        linker.func_wrap(
            "env",
            "chat",
            |mut caller: Caller<'_, Self>, ptr: i32, len: i32| {
                if let Some(text) = read_string(&mut caller, ptr, len) {
                    caller.data_mut().calls.push(HostCall::Chat(text));
                }
            },
        )?;

        // log: (ptr: i32, len: i32)
        linker.func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, Self>, ptr: i32, len: i32| {
                if let Some(text) = read_string(&mut caller, ptr, len) {
                    caller.data_mut().calls.push(HostCall::Log(text));
                }
            },
        )?;

        Ok(())
    }
}

/// Read a UTF-8 string out of the guest's exported memory.
/// Out-of-range pointers yield `None`.
fn read_string(caller: &mut Caller<'_, HostFunctions>, ptr: i32, len: i32) -> Option<String> {
    let memory = caller.get_export("memory")?.into_memory()?;
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    let bytes = memory.data(&*caller).get(start..end)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}
