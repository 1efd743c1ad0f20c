//! Extension registry and isolated hook dispatch.

use crate::bundle::{ModBundle, ModManifest};
use crate::context::{ModCommand, ModContext, Services};
use crate::hooks::{Hook, HookSet, ModEvent};
use delve_core::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// A loaded behaviour unit.
///
/// `hooks` is the capability declaration: `handle` is only ever called with
/// events whose hook is in the returned set.
pub trait Extension: Send {
    fn hooks(&self) -> HookSet;
    fn handle(&mut self, event: &ModEvent, ctx: &mut ModContext<'_>) -> Result<()>;
}

pub struct LoadedExtension {
    pub manifest: ModManifest,
    pub bundle: ModBundle,
    initialized: bool,
    failures: u64,
    extension: Box<dyn Extension>,
}

impl LoadedExtension {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn provides(&self, hook: Hook) -> bool {
        self.extension.hooks().contains(hook)
    }
}

/// Outcome of delivering one event to every interested extension
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub commands: Vec<ModCommand>,
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Sandbox {
    extensions: Vec<LoadedExtension>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extension; dispatch follows load order.
    ///
    /// Loading a second extension under an existing name replaces the first
    /// in place, keeping its position.
    pub fn load(&mut self, manifest: ModManifest, bundle: ModBundle, extension: Box<dyn Extension>) {
        info!(
            extension = %manifest.name,
            version = %manifest.version,
            hooks = ?extension.hooks(),
            "Loading extension"
        );

        let loaded = LoadedExtension {
            manifest,
            bundle,
            initialized: false,
            failures: 0,
            extension,
        };

        match self
            .extensions
            .iter_mut()
            .find(|e| e.manifest.name == loaded.manifest.name)
        {
            Some(slot) => *slot = loaded,
            None => self.extensions.push(loaded),
        }
    }

    pub fn unload(&mut self, name: &str) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| e.manifest.name != name);
        before != self.extensions.len()
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    pub fn get(&self, name: &str) -> Option<&LoadedExtension> {
        self.extensions.iter().find(|e| e.manifest.name == name)
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Deliver `event` to each extension providing its hook, in load order.
    ///
    /// Every invocation is isolated: an error or panic is logged against the
    /// extension, the commands it queued during that call are discarded, and
    /// the remaining extensions still receive the event. The
    /// world applies the returned commands before its own dispatch returns.
    pub fn dispatch(&mut self, event: &ModEvent, services: &mut Services<'_>) -> DispatchReport {
        let hook = event.hook();
        let mut report = DispatchReport::default();

        for loaded in &mut self.extensions {
            if !loaded.provides(hook) {
                continue;
            }

            if hook == Hook::GameStart {
                if loaded.initialized {
                    continue;
                }
                loaded.initialized = true;
            }

            let mut commands = Vec::new();
            let mut ctx = ModContext::new(
                &loaded.manifest.name,
                &loaded.bundle,
                services.blocks,
                services.tools,
                services.world,
                &mut commands,
            );

            let extension = &mut loaded.extension;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| extension.handle(event, &mut ctx)))
                .unwrap_or_else(|payload| {
                    Err(Error::extension(
                        loaded.manifest.name.clone(),
                        panic_message(payload.as_ref()),
                    ))
                });

            report.invoked += 1;
            match outcome {
                Ok(()) => report.commands.append(&mut commands),
                Err(e) => {
                    loaded.failures += 1;
                    report.failed += 1;
                    warn!(
                        extension = %loaded.manifest.name,
                        hook = ?hook,
                        failures = loaded.failures,
                        discarded = commands.len(),
                        error = %e,
                        "Extension hook failed"
                    );
                }
            }
        }

        if report.invoked > 0 {
            debug!(
                hook = ?hook,
                invoked = report.invoked,
                failed = report.failed,
                commands = report.commands.len(),
                "Dispatched event"
            );
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::EmptyWorld;
    use crate::native::NativeExtension;
    use delve_core::{BlockDef, BlockRegistry, Layer, ToolRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dispatch(sandbox: &mut Sandbox, event: &ModEvent) -> DispatchReport {
        let mut blocks = BlockRegistry::new();
        let mut tools = ToolRegistry::new();
        let mut services = Services {
            blocks: &mut blocks,
            tools: &mut tools,
            world: &EmptyWorld,
        };
        sandbox.dispatch(event, &mut services)
    }

    fn counter_extension(counter: Arc<AtomicUsize>) -> NativeExtension {
        NativeExtension::new().on(Hook::Tick, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_failing_extension_does_not_block_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut sandbox = Sandbox::new();

        sandbox.load(
            ModManifest::new("broken", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::Tick, |_, _| {
                Err(Error::Other("always fails".to_string()))
            })),
        );
        sandbox.load(
            ModManifest::new("panicky", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::Tick, |_, _| panic!("boom"))),
        );
        sandbox.load(
            ModManifest::new("healthy", "1.0"),
            ModBundle::new(),
            Box::new(counter_extension(counter.clone())),
        );

        for tick in 0..3 {
            let report = dispatch(&mut sandbox, &ModEvent::Tick { tick });
            assert_eq!(report.invoked, 3);
            assert_eq!(report.failed, 2);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(sandbox.get("broken").unwrap().failures(), 3);
        assert_eq!(sandbox.get("panicky").unwrap().failures(), 3);
        assert_eq!(sandbox.get("healthy").unwrap().failures(), 0);
    }

    #[test]
    fn test_game_start_fires_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let mut sandbox = Sandbox::new();
        sandbox.load(
            ModManifest::new("init", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::GameStart, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        dispatch(&mut sandbox, &ModEvent::GameStart);
        dispatch(&mut sandbox, &ModEvent::GameStart);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(sandbox.get("init").unwrap().is_initialized());
    }

    #[test]
    fn test_hooks_not_provided_are_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut sandbox = Sandbox::new();
        sandbox.load(
            ModManifest::new("ticker", "1.0"),
            ModBundle::new(),
            Box::new(counter_extension(counter.clone())),
        );

        let report = dispatch(&mut sandbox, &ModEvent::WorldStart);
        assert_eq!(report.invoked, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_commands_keep_dispatch_order() {
        let mut sandbox = Sandbox::new();
        for name in ["first", "second"] {
            sandbox.load(
                ModManifest::new(name, "1.0"),
                ModBundle::new(),
                Box::new(NativeExtension::new().on(Hook::WorldStart, |_, ctx| {
                    ctx.chat("ready");
                    Ok(())
                })),
            );
        }

        let report = dispatch(&mut sandbox, &ModEvent::WorldStart);
        let senders: Vec<_> = report
            .commands
            .iter()
            .map(|c| match c {
                ModCommand::Chat { from, .. } => from.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(senders, vec!["first", "second"]);
    }

    #[test]
    fn test_failed_hook_commands_are_discarded() {
        let mut sandbox = Sandbox::new();
        sandbox.load(
            ModManifest::new("erring", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::WorldStart, |_, ctx| {
                ctx.set_tile(0, 0, Layer::Foreground, 1);
                Err(Error::Other("half done".to_string()))
            })),
        );
        sandbox.load(
            ModManifest::new("panicking", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::WorldStart, |_, ctx| {
                ctx.chat("before the panic");
                panic!("boom")
            })),
        );
        sandbox.load(
            ModManifest::new("healthy", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::WorldStart, |_, ctx| {
                ctx.chat("ok");
                Ok(())
            })),
        );

        let report = dispatch(&mut sandbox, &ModEvent::WorldStart);

        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.commands.len(), 1);
        match &report.commands[0] {
            ModCommand::Chat { from, text } => {
                assert_eq!(from, "healthy");
                assert_eq!(text, "ok");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_registry_is_injected() {
        let mut sandbox = Sandbox::new();
        sandbox.load(
            ModManifest::new("blocks", "1.0"),
            ModBundle::new(),
            Box::new(NativeExtension::new().on(Hook::GameStart, |_, ctx| {
                ctx.blocks_mut().register(77, BlockDef::solid("obsidian"));
                ctx.set_tile(1, 1, Layer::Foreground, 77);
                Ok(())
            })),
        );

        let mut blocks = BlockRegistry::new();
        let mut tools = ToolRegistry::new();
        let mut services = Services {
            blocks: &mut blocks,
            tools: &mut tools,
            world: &EmptyWorld,
        };
        let report = sandbox.dispatch(&ModEvent::GameStart, &mut services);

        assert_eq!(report.commands.len(), 1);
        assert_eq!(blocks.lookup(77).unwrap().sprite, "obsidian");
    }

    #[test]
    fn test_reload_replaces_in_place() {
        let mut sandbox = Sandbox::new();
        sandbox.load(ModManifest::new("a", "1.0"), ModBundle::new(), Box::new(NativeExtension::new()));
        sandbox.load(ModManifest::new("b", "1.0"), ModBundle::new(), Box::new(NativeExtension::new()));
        sandbox.load(ModManifest::new("a", "2.0"), ModBundle::new(), Box::new(NativeExtension::new()));

        let names: Vec<_> = sandbox
            .extensions()
            .iter()
            .map(|e| (e.manifest.name.as_str(), e.manifest.version.as_str()))
            .collect();
        assert_eq!(names, vec![("a", "2.0"), ("b", "1.0")]);
        assert!(sandbox.unload("a"));
        assert!(!sandbox.unload("a"));
    }
}
