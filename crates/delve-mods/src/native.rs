//! Extensions written as Rust closures.

use crate::context::ModContext;
use crate::hooks::{Hook, HookSet, ModEvent};
use crate::sandbox::Extension;
use delve_core::Result;
use std::collections::HashMap;

type Handler = Box<dyn FnMut(&ModEvent, &mut ModContext<'_>) -> Result<()> + Send>;

/// An extension assembled from one closure per hook
#[derive(Default)]
pub struct NativeExtension {
    handlers: HashMap<Hook, Handler>,
}

impl NativeExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide `hook`, replacing any earlier handler for it
    pub fn on<F>(mut self, hook: Hook, handler: F) -> Self
    where
        F: FnMut(&ModEvent, &mut ModContext<'_>) -> Result<()> + Send + 'static,
    {
        self.handlers.insert(hook, Box::new(handler));
        self
    }
}

impl Extension for NativeExtension {
    fn hooks(&self) -> HookSet {
        self.handlers.keys().copied().collect()
    }

    fn handle(&mut self, event: &ModEvent, ctx: &mut ModContext<'_>) -> Result<()> {
        match self.handlers.get_mut(&event.hook()) {
            Some(handler) => handler(event, ctx),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_follow_handlers() {
        let extension = NativeExtension::new()
            .on(Hook::Tick, |_, _| Ok(()))
            .on(Hook::StandOn, |_, _| Ok(()));

        let hooks = extension.hooks();
        assert!(hooks.contains(Hook::Tick));
        assert!(hooks.contains(Hook::StandOn));
        assert!(!hooks.contains(Hook::HitHead));
    }
}
