//! Extension points for observing and overriding requests in flight.
//!
//! Call sites are a fixed enumerated set (`HookSite`) carrying typed
//! arguments (`HookArgs`); a callback may return a replacement buffer. A
//! string-keyed `install`/`uninstall`/`call` façade sits on top for callers
//! that only know the hook by name, matching the original hook registry's
//! string API without reopening the call-site set to arbitrary names.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::databank::block::Space;

/// Fixed set of points where a hook may observe or rewrite a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSite {
    BeforeSend,
    AfterSend,
    BeforeReceive,
    AfterReceive,
    BeforeWrite,
    AfterWrite,
}

impl HookSite {
    pub fn name(self) -> &'static str {
        match self {
            HookSite::BeforeSend => "before_send",
            HookSite::AfterSend => "after_send",
            HookSite::BeforeReceive => "before_receive",
            HookSite::AfterReceive => "after_receive",
            HookSite::BeforeWrite => "before_write",
            HookSite::AfterWrite => "after_write",
        }
    }
}

/// Arguments passed to a hook callback at a given `HookSite`.
#[derive(Debug, Clone)]
pub enum HookArgs {
    BeforeSend { buffer: Vec<u8> },
    AfterSend { buffer: Vec<u8> },
    BeforeReceive,
    AfterReceive { buffer: Vec<u8> },
    BeforeWrite { unit_id: u8, space: Space, address: u16 },
    AfterWrite { unit_id: u8, space: Space, address: u16 },
}

impl HookArgs {
    pub fn site(&self) -> HookSite {
        match self {
            HookArgs::BeforeSend { .. } => HookSite::BeforeSend,
            HookArgs::AfterSend { .. } => HookSite::AfterSend,
            HookArgs::BeforeReceive => HookSite::BeforeReceive,
            HookArgs::AfterReceive { .. } => HookSite::AfterReceive,
            HookArgs::BeforeWrite { .. } => HookSite::BeforeWrite,
            HookArgs::AfterWrite { .. } => HookSite::AfterWrite,
        }
    }
}

pub type HookFn = Box<dyn Fn(&HookArgs) -> Option<Vec<u8>> + Send + Sync>;

/// `name -> [fn]` registry, keyed by `HookSite::name()` so existing callers
/// that only know hooks by string keep working.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<&'static str, Vec<HookFn>>>,
}

impl HookRegistry {
    pub fn new() -> HookRegistry {
        HookRegistry::default()
    }

    /// Register a callback at `site`.
    pub fn install(&self, site: HookSite, callback: HookFn) {
        self.hooks.write().entry(site.name()).or_default().push(callback);
    }

    /// Remove every callback registered at `site`. The original string API
    /// allowed removing a single function; since closures aren't
    /// comparable, this crate only supports clearing the whole site.
    pub fn uninstall(&self, site: HookSite) {
        self.hooks.write().remove(site.name());
    }

    /// Invoke every callback registered at this `HookArgs`' site, in
    /// registration order. Returns the last non-`None` replacement buffer,
    /// if any.
    pub fn call(&self, args: HookArgs) -> Option<Vec<u8>> {
        let site = args.site();
        let hooks = self.hooks.read();
        let mut replacement = None;
        if let Some(callbacks) = hooks.get(site.name()) {
            for callback in callbacks {
                if let Some(buffer) = callback(&args) {
                    replacement = Some(buffer);
                }
            }
        }
        replacement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn install_and_call_invokes_registered_hook() {
        let registry = HookRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.install(
            HookSite::AfterWrite,
            Box::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                None
            }),
        );
        registry.call(HookArgs::AfterWrite {
            unit_id: 1,
            space: Space::HoldingRegisters,
            address: 0,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_with_no_hooks_returns_none() {
        let registry = HookRegistry::new();
        assert!(registry.call(HookArgs::BeforeReceive).is_none());
    }

    #[test]
    fn uninstall_clears_the_site() {
        let registry = HookRegistry::new();
        registry.install(HookSite::BeforeSend, Box::new(|_| None));
        registry.uninstall(HookSite::BeforeSend);
        assert!(registry
            .call(HookArgs::BeforeSend { buffer: vec![] })
            .is_none());
    }

    #[test]
    fn later_hook_replacement_wins() {
        let registry = HookRegistry::new();
        registry.install(HookSite::BeforeSend, Box::new(|_| Some(vec![1])));
        registry.install(HookSite::BeforeSend, Box::new(|_| Some(vec![2])));
        let result = registry.call(HookArgs::BeforeSend { buffer: vec![0] });
        assert_eq!(result, Some(vec![2]));
    }
}
