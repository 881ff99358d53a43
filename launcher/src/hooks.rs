//! Process exit hooks.
//!
//! The supervisor registers a hook that stops the runtime when the process
//! is asked to exit, and deregisters it once the runtime has stopped on its
//! own. [`ExitHooks`] is the seam; [`HookRegistry`] is the in-process
//! implementation the binary wires to its interrupt handler.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

/// Identifier returned by [`ExitHooks::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(pub u64);

/// Hook body. Runs at most once.
pub type ExitHook = Box<dyn Fn() + Send + Sync>;

/// Registration point for hooks that run when the process is asked to exit.
pub trait ExitHooks: Send + Sync {
    fn register(&self, name: &str, hook: ExitHook) -> HookId;

    /// Remove a hook. Returns `false` when it was not registered (or already ran).
    fn deregister(&self, id: HookId) -> bool;
}

/// In-process hook table.
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    hooks: Mutex<BTreeMap<HookId, (String, ExitHook)>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and remove every registered hook, in registration order.
    ///
    /// Hooks are taken out of the table before they run, so a hook may
    /// deregister itself (or others) without deadlocking.
    pub fn run_all(&self) {
        let hooks = std::mem::take(&mut *self.table());
        for (id, (name, hook)) in hooks {
            info!(hook = %name, id = id.0, "running exit hook");
            hook();
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, BTreeMap<HookId, (String, ExitHook)>> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ExitHooks for HookRegistry {
    fn register(&self, name: &str, hook: ExitHook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(hook = name, id = id.0, "registering exit hook");
        self.table().insert(id, (name.to_string(), hook));
        id
    }

    fn deregister(&self, id: HookId) -> bool {
        let removed = self.table().remove(&id).is_some();
        debug!(id = id.0, removed, "deregistering exit hook");
        removed
    }
}
