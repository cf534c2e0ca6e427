use super::registry::{self, StateGuard};
use super::{HookId, InvocationHint, SignalFlags, SignalId, report};
use crate::error::SignalError;
use crate::quark::Quark;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Runs once per emission of the signal it is attached to, before any
/// handler. Returning `false` removes the hook.
pub type EmissionHookFn = Arc<dyn Fn(&InvocationHint, &[Value]) -> bool + Send + Sync>;

/// Runs when a hook is removed or its signal is destroyed
pub type DestroyNotify = Box<dyn FnOnce() + Send>;

pub(super) struct EmissionHook {
    pub(super) id: HookId,
    pub(super) detail: Option<Quark>,
    pub(super) func: EmissionHookFn,
    destroy: Mutex<Option<DestroyNotify>>,
}

impl Drop for EmissionHook {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy.get_mut().take() {
            destroy();
        }
    }
}

/// A signal's emission hooks in insertion order
#[derive(Default)]
pub(super) struct HookList {
    hooks: Vec<Arc<EmissionHook>>,
}

impl HookList {
    pub(super) fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hooks that fire for an emission with `detail`
    pub(super) fn matching(&self, detail: Option<Quark>) -> Vec<Arc<EmissionHook>> {
        self.hooks
            .iter()
            .filter(|hook| hook.detail.is_none() || hook.detail == detail)
            .cloned()
            .collect()
    }

    pub(super) fn remove(&mut self, id: HookId) -> Option<Arc<EmissionHook>> {
        let index = self.hooks.iter().position(|hook| hook.id == id)?;
        Some(self.hooks.remove(index))
    }

    pub(super) fn take(&mut self) -> Vec<Arc<EmissionHook>> {
        std::mem::take(&mut self.hooks)
    }
}

fn add_hook(
    state: &mut StateGuard,
    signal_id: SignalId,
    detail: Option<Quark>,
    func: EmissionHookFn,
    destroy: Option<DestroyNotify>,
) -> Result<HookId, SignalError> {
    let id = HookId(state.next_hook_id);
    let node = state
        .node_mut(signal_id)
        .ok_or(SignalError::InvalidId(signal_id))?;
    if node.flags.contains(SignalFlags::NO_HOOKS) {
        return Err(SignalError::HooksDisabled(signal_id));
    }
    if detail.is_some() && !node.flags.contains(SignalFlags::DETAILED) {
        return Err(SignalError::DetailNotSupported(signal_id));
    }
    node.hooks.hooks.push(Arc::new(EmissionHook {
        id,
        detail,
        func,
        destroy: Mutex::new(destroy),
    }));
    state.next_hook_id += 1;
    Ok(id)
}

/// Attach a hook that observes every emission of `signal_id`, optionally
/// only those with `detail`.
///
/// # Arguments
/// * `hook` - called with the invocation hint and the emission parameters
/// * `destroy` - called once the hook is gone
///
/// # Returns
/// The hook id, or `None` if the signal is unknown, refuses hooks or does
/// not take details. `destroy` is dropped uncalled on refusal.
pub fn add_emission_hook<F>(
    signal_id: SignalId,
    detail: Option<Quark>,
    hook: F,
    destroy: Option<DestroyNotify>,
) -> Option<HookId>
where
    F: Fn(&InvocationHint, &[Value]) -> bool + Send + Sync + 'static,
{
    let mut state = registry::lock();
    match add_hook(&mut state, signal_id, detail, Arc::new(hook), destroy) {
        Ok(hook_id) => {
            debug!(%signal_id, %hook_id, "added emission hook");
            Some(hook_id)
        }
        Err(err) => {
            drop(state);
            report(err);
            None
        }
    }
}

/// Detach a hook, running its destroy notifier
pub fn remove_emission_hook(signal_id: SignalId, hook_id: HookId) -> bool {
    let removed = registry::lock()
        .node_mut(signal_id)
        .and_then(|node| node.hooks.remove(hook_id));
    match removed {
        Some(hook) => {
            drop(hook);
            true
        }
        None => {
            report(SignalError::HookNotFound { signal_id, hook_id });
            false
        }
    }
}
