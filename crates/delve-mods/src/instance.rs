//! WASM-backed extension instances.

use crate::context::{MobSpawn, ModContext};
use crate::hooks::{Hook, HookSet, ModEvent};
use crate::host_functions::{HostCall, HostFunctions};
use crate::sandbox::Extension;
use crate::RuntimeConfig;
use delve_core::{Error, Result};
use tracing::{debug, info};
use wasmtime::*;

/// A running extension module.
///
/// A hook is provided exactly when the module exports its function, so the
/// capability set is fixed at instantiation.
pub struct WasmExtension {
    store: Store<HostFunctions>,
    instance: Instance,
    hooks: HookSet,
    reads_tiles: bool,
    config: RuntimeConfig,
}

impl WasmExtension {
    pub fn new(engine: &Engine, wasm_bytes: &[u8], config: RuntimeConfig) -> Result<Self> {
        let module = Module::new(engine, wasm_bytes)
            .map_err(|e| Error::Wasm(format!("Failed to compile module: {}", e)))?;

        let reads_tiles = module.imports().any(|import| import.name() == "get_tile");

        let mut linker = Linker::new(engine);
        HostFunctions::add_to_linker(&mut linker)
            .map_err(|e| Error::Wasm(format!("Failed to add host functions: {}", e)))?;

        let mut store = Store::new(engine, HostFunctions::new());
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| Error::Wasm(format!("Failed to set fuel: {}", e)))?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| Error::Wasm(format!("Failed to instantiate: {}", e)))?;

        let hooks = Hook::ALL
            .into_iter()
            .filter(|hook| instance.get_func(&mut store, hook.export_name()).is_some())
            .collect();

        Ok(Self {
            store,
            instance,
            hooks,
            reads_tiles,
            config,
        })
    }

    fn invoke<P: WasmParams>(&mut self, hook: Hook, params: P) -> Result<()> {
        let name = hook.export_name();
        let func = self
            .instance
            .get_typed_func::<P, ()>(&mut self.store, name)
            .map_err(|e| Error::Wasm(format!("Export {} has the wrong signature: {}", name, e)))?;

        func.call(&mut self.store, params).map_err(|e| {
            if let Some(trap) = e.downcast_ref::<Trap>() {
                if matches!(trap, Trap::OutOfFuel) {
                    return Error::ResourceExhausted(format!("{} ran out of fuel", name));
                }
            }
            Error::Wasm(format!("{} failed: {}", name, e))
        })
    }

    fn call_hook(&mut self, event: &ModEvent) -> Result<()> {
        match event {
            ModEvent::GameStart | ModEvent::WorldStart | ModEvent::MobAdded { .. } => {
                self.invoke(event.hook(), ())
            }
            ModEvent::Tick { tick } => self.invoke(Hook::Tick, *tick as i64),
            ModEvent::TileSet {
                pos,
                layer,
                tile,
                previous,
            } => self.invoke(
                Hook::TileSet,
                (
                    pos.x,
                    pos.y,
                    layer.to_index() as i32,
                    *tile as i32,
                    *previous as i32,
                ),
            ),
            ModEvent::ToolUse { pos, .. } => self.invoke(Hook::ToolUse, (pos.x, pos.y)),
            ModEvent::ToolProgress { pos, progress, .. } => self.invoke(
                Hook::ToolProgress,
                (pos.x, pos.y, (progress * 1000.0) as i32),
            ),
            ModEvent::Trigger { pos, tile, .. }
            | ModEvent::StandOn { pos, tile, .. }
            | ModEvent::BlockedBy { pos, tile, .. }
            | ModEvent::HitHead { pos, tile, .. } => {
                self.invoke(event.hook(), (pos.x, pos.y, *tile as i32))
            }
            ModEvent::TimerFired { pos, layer, .. } => self.invoke(
                Hook::TimerFired,
                (pos.x, pos.y, layer.to_index() as i32),
            ),
        }
    }

    /// Fuel used by the most recent call
    pub fn fuel_consumed(&self) -> u64 {
        self.config.max_fuel - self.store.get_fuel().unwrap_or(0)
    }
}

impl Extension for WasmExtension {
    fn hooks(&self) -> HookSet {
        self.hooks
    }

    fn handle(&mut self, event: &ModEvent, ctx: &mut ModContext<'_>) -> Result<()> {
        // Reset fuel for this call
        self.store
            .set_fuel(self.config.max_fuel)
            .map_err(|e| Error::Wasm(format!("Failed to set fuel: {}", e)))?;

        {
            let host = self.store.data_mut();
            host.calls.clear();
            host.snapshot = self.reads_tiles.then(|| ctx.world().snapshot());
        }

        let result = self.call_hook(event);

        let calls = {
            let host = self.store.data_mut();
            host.snapshot = None;
            std::mem::take(&mut host.calls)
        };

        debug!(
            extension = %ctx.name(),
            hook = ?event.hook(),
            fuel = self.fuel_consumed(),
            "WASM hook returned"
        );

        // A trapped call leaves no partial effects behind.
        result?;

        let tile_size = ctx.world().tile_size() as f32;
        for call in calls {
            match call {
                HostCall::SetTile { x, y, layer, tile } => ctx.set_tile(x, y, layer, tile),
                HostCall::SpawnMob { x, y } => {
                    let spawn = MobSpawn::new(
                        format!("{}-mob", ctx.name()),
                        x as f32 * tile_size,
                        y as f32 * tile_size,
                        tile_size * 0.75,
                        tile_size * 0.75,
                    );
                    ctx.spawn_mob(spawn);
                }
                HostCall::Chat(text) => ctx.chat(text),
                HostCall::Log(text) => info!(extension = %ctx.name(), "{}", text),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{ModBundle, ModManifest};
    use crate::context::tests::EmptyWorld;
    use crate::context::{ModCommand, Services};
    use crate::sandbox::Sandbox;
    use crate::Runtime;
    use delve_core::{BlockRegistry, Layer, TilePos, ToolRegistry};

    const TILE_MIRROR: &str = r#"
        (module
          (import "env" "get_tile" (func $get_tile (param i32 i32 i32) (result i32)))
          (import "env" "set_tile" (func $set_tile (param i32 i32 i32 i32)))
          (import "env" "chat" (func $chat (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "placed")
          (func (export "on_tile_set") (param $x i32) (param $y i32) (param $layer i32) (param $tile i32) (param $previous i32)
            (call $set_tile (local.get $x) (i32.add (local.get $y) (i32.const 1)) (i32.const 1) (local.get $tile))
            (call $chat (i32.const 0) (i32.const 6)))
          (func (export "on_tick") (param $tick i64)
            (drop (call $get_tile (i32.const 0) (i32.const 0) (i32.const 0)))))
    "#;

    const SPINNER: &str = r#"
        (module
          (func (export "on_tick") (param $tick i64)
            (loop $forever (br $forever))))
    "#;

    fn dispatch(sandbox: &mut Sandbox, event: &ModEvent) -> crate::sandbox::DispatchReport {
        let mut blocks = BlockRegistry::new();
        let mut tools = ToolRegistry::new();
        let mut services = Services {
            blocks: &mut blocks,
            tools: &mut tools,
            world: &EmptyWorld,
        };
        sandbox.dispatch(event, &mut services)
    }

    #[test]
    fn test_hooks_follow_exports() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let extension = runtime.instantiate(TILE_MIRROR.as_bytes()).unwrap();

        let hooks = extension.hooks();
        assert!(hooks.contains(Hook::TileSet));
        assert!(hooks.contains(Hook::Tick));
        assert!(!hooks.contains(Hook::GameStart));
    }

    #[test]
    fn test_host_calls_become_commands() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let extension = runtime.instantiate(TILE_MIRROR.as_bytes()).unwrap();
        let mut sandbox = Sandbox::new();
        sandbox.load(ModManifest::new("mirror", "1.0"), ModBundle::new(), Box::new(extension));

        let report = dispatch(
            &mut sandbox,
            &ModEvent::TileSet {
                pos: TilePos::new(3, 4),
                layer: Layer::Foreground,
                tile: 9,
                previous: 0,
            },
        );

        assert_eq!(report.failed, 0);
        assert_eq!(report.commands.len(), 2);
        match &report.commands[0] {
            ModCommand::SetTile { x, y, layer, tile } => {
                assert_eq!((*x, *y, *layer, *tile), (3, 5, Layer::Background, 9));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &report.commands[1] {
            ModCommand::Chat { from, text } => {
                assert_eq!(from, "mirror");
                assert_eq!(text, "placed");
            }
            other => panic!("unexpected {other:?}"),
        }

        let report = dispatch(&mut sandbox, &ModEvent::Tick { tick: 1 });
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_runaway_extension_is_stopped_by_fuel() {
        let runtime = Runtime::new(RuntimeConfig {
            max_fuel: 5_000,
            ..Default::default()
        })
        .unwrap();
        let extension = runtime.instantiate(SPINNER.as_bytes()).unwrap();
        let mut sandbox = Sandbox::new();
        sandbox.load(ModManifest::new("spinner", "1.0"), ModBundle::new(), Box::new(extension));

        let report = dispatch(&mut sandbox, &ModEvent::Tick { tick: 0 });
        assert_eq!(report.invoked, 1);
        assert_eq!(report.failed, 1);

        // Still callable afterwards: the fuel is refilled per call.
        let report = dispatch(&mut sandbox, &ModEvent::Tick { tick: 1 });
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_invalid_module_is_rejected() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        assert!(runtime.instantiate(b"not wasm").is_err());
    }
}
