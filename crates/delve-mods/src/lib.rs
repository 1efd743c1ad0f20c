//! Extension sandbox for the world engine.
//!
//! This crate provides the execution environment for mods, including:
//! - The closed set of lifecycle hooks and their events
//! - Capability-scoped contexts bound to one extension
//! - Per-extension failure isolation during dispatch
//! - A fuel-limited WebAssembly runtime for extension code

pub mod brain;
pub mod bundle;
pub mod context;
pub mod hooks;
pub mod host_functions;
pub mod instance;
pub mod native;
pub mod sandbox;

pub use brain::{Brain, MobHandle, Pacer};
pub use bundle::{ModBundle, ModManifest};
pub use context::{MobInfo, MobSpawn, ModCommand, ModContext, Services, TileSnapshot, WorldQuery};
pub use hooks::{Hook, HookSet, ModEvent};
pub use instance::WasmExtension;
pub use native::NativeExtension;
pub use sandbox::{DispatchReport, Extension, LoadedExtension, Sandbox};

use delve_core::{Error, ModConfig, Result};
use tracing::info;
use wasmtime::*;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Fuel granted per hook invocation
    pub max_fuel: u64,
    /// Maximum WASM stack size (bytes)
    pub max_wasm_stack: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_fuel: 100_000,
            max_wasm_stack: 128 * 1024,
        }
    }
}

impl From<&ModConfig> for RuntimeConfig {
    fn from(config: &ModConfig) -> Self {
        Self {
            max_fuel: config.max_fuel_per_call,
            ..Default::default()
        }
    }
}

/// The WASM runtime manager
pub struct Runtime {
    engine: Engine,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(true);
        wasm_config.max_wasm_stack(config.max_wasm_stack);

        let engine = Engine::new(&wasm_config)
            .map_err(|e| Error::Wasm(format!("Failed to create engine: {}", e)))?;

        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a new extension instance from WASM bytes (or text)
    pub fn instantiate(&self, wasm_bytes: &[u8]) -> Result<WasmExtension> {
        WasmExtension::new(&self.engine, wasm_bytes, self.config.clone())
    }

    /// Load a bundle into the sandbox according to its manifest.
    ///
    /// Bundles without an entry module are resource-only and provide no hooks.
    pub fn load_bundle(&self, sandbox: &mut Sandbox, bundle: ModBundle) -> Result<ModManifest> {
        let manifest = bundle.manifest()?;

        let extension: Box<dyn Extension> = match &manifest.entry {
            Some(entry) => {
                let bytes = bundle.resource(entry).ok_or_else(|| {
                    Error::NotFound(format!("{}: entry module {}", manifest.name, entry))
                })?;
                Box::new(self.instantiate(bytes)?)
            }
            None => Box::new(NativeExtension::new()),
        };

        info!(extension = %manifest.name, files = bundle.len(), "Bundle loaded");
        sandbox.load(manifest.clone(), bundle, extension);
        Ok(manifest)
    }
}
