//! Reference-counted deferred callables
//!
//! A [`Closure`] wraps a callback together with its marshaller and a table of
//! lifecycle notifiers. The logical reference count, the floating flag and
//! the notifier counts live in a single packed word updated by
//! compare-and-swap; the notifier table itself is guarded by a per-closure
//! mutex that is never held while user code runs.
//!
//! Cloning a [`Closure`] only copies the handle. Ownership in the signal
//! sense is tracked explicitly with [`Closure::add_ref`], [`Closure::unref`]
//! and [`Closure::sink`].

#[cfg(test)]
mod tests;

pub mod marshal;
mod state;

use crate::error::ClosureError;
use crate::quark::Quark;
use crate::signal::InvocationHint;
use crate::types::Type;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use state::{
    AtomicState, ClosureState, MAX_FNOTIFIERS, MAX_GUARDS, MAX_INOTIFIERS, MAX_REF_COUNT,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// The user function behind a closure
pub type Callback = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Opaque user data attached to a closure
pub type ClosureData = Arc<dyn Any + Send + Sync>;

/// Data handed from a meta marshaller to the marshaller
pub type MarshalData = Arc<dyn Any + Send + Sync>;

/// Lifecycle notifier. Identity (`Arc::ptr_eq`) is what removal matches on.
pub type NotifyFn = Arc<dyn Fn(&Closure) + Send + Sync>;

/// Unpacks an [`Invocation`] and calls the underlying callback
pub type MarshalFn = Arc<dyn Fn(&Closure, Invocation<'_>) + Send + Sync>;

/// Everything a marshaller receives for one call
pub struct Invocation<'a> {
    pub return_value: Option<&'a mut Value>,
    pub params: &'a [Value],
    pub hint: Option<&'a InvocationHint>,
    pub marshal_data: Option<&'a MarshalData>,
}

#[derive(Clone)]
enum NotifierSlot {
    MetaMarshal { data: MarshalData, marshal: MarshalFn },
    Notify(NotifyFn),
}

impl NotifierSlot {
    fn into_notify(self) -> Option<NotifyFn> {
        match self {
            NotifierSlot::Notify(notify) => Some(notify),
            NotifierSlot::MetaMarshal { .. } => None,
        }
    }

    fn is(&self, other: &NotifyFn) -> bool {
        matches!(self, NotifierSlot::Notify(notify) if Arc::ptr_eq(notify, other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyStage {
    Finalize,
    Invalidate,
}

/// Which notifier, if any, has been popped and is currently executing
enum NotifierExecutionState {
    Idle,
    Running {
        stage: NotifyStage,
        notifier: NotifyFn,
    },
}

/// Layout: `[meta marshal?][pre guards][post guards][finalize][invalidate]`
struct NotifierTable {
    slots: Vec<NotifierSlot>,
    running: NotifierExecutionState,
}

impl NotifierTable {
    fn is_running(&self, stage: NotifyStage, notify: &NotifyFn) -> bool {
        matches!(
            &self.running,
            NotifierExecutionState::Running { stage: running, notifier }
                if *running == stage && Arc::ptr_eq(notifier, notify)
        )
    }
}

struct ClosureInner {
    state: AtomicState,
    swapped: bool,
    callback: RwLock<Option<Callback>>,
    data: RwLock<Option<ClosureData>>,
    marshal: RwLock<Option<MarshalFn>>,
    notifiers: Mutex<NotifierTable>,
}

/// A deferred, reference-counted callable
#[derive(Clone)]
pub struct Closure(Arc<ClosureInner>);

fn report(err: ClosureError) {
    warn!(%err, "closure misuse");
}

impl Closure {
    fn build(callback: Option<Callback>, data: Option<ClosureData>, swapped: bool) -> Closure {
        Closure(Arc::new(ClosureInner {
            state: AtomicState::new(ClosureState::initial()),
            swapped,
            callback: RwLock::new(callback),
            data: RwLock::new(data),
            marshal: RwLock::new(None),
            notifiers: Mutex::new(NotifierTable {
                slots: Vec::new(),
                running: NotifierExecutionState::Idle,
            }),
        }))
    }

    /// A bare closure carrying `data`. It does nothing until a marshal is set.
    pub fn new(data: Option<ClosureData>) -> Closure {
        Self::build(None, data, false)
    }

    /// Wrap a plain callback
    pub fn from_fn<F>(callback: F) -> Closure
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::build(Some(Arc::new(callback)), None, false)
    }

    /// Wrap a shared callback, keeping its identity for matching
    pub fn from_callback(callback: Callback) -> Closure {
        Self::build(Some(callback), None, false)
    }

    /// Like [`Closure::from_fn`], but the first parameter (the instance) is
    /// passed last
    pub fn from_fn_swap<F>(callback: F) -> Closure
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::build(Some(Arc::new(callback)), None, true)
    }

    /// Swapped variant of [`Closure::from_callback`]
    pub fn from_callback_swap(callback: Callback) -> Closure {
        Self::build(Some(callback), None, true)
    }

    /// Wrap a callback together with its user data
    pub fn with_data(callback: Callback, data: ClosureData) -> Closure {
        Self::build(Some(callback), Some(data), false)
    }

    /// Swapped variant of [`Closure::with_data`]
    pub fn with_data_swap(callback: Callback, data: ClosureData) -> Closure {
        Self::build(Some(callback), Some(data), true)
    }

    /// A closure that resolves virtual slot `slot` on the class of the
    /// instance it is invoked on, at invocation time
    pub fn class_vfunc(itype: Type, slot: &str) -> Closure {
        let closure = Self::build(None, None, false);
        let data: MarshalData = Arc::new(marshal::ClassSlot {
            itype,
            slot: Quark::intern(slot),
        });
        closure.set_meta_marshal(data, marshal::class_meta());
        closure
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn state(&self) -> ClosureState {
        self.0.state.load()
    }

    /// Take a reference, returning a handle for chaining
    pub fn add_ref(&self) -> Closure {
        let (old, _) = self.0.state.update(|s| {
            if s.ref_count() == 0 {
                return s;
            }
            assert!(
                s.ref_count() < MAX_REF_COUNT,
                "closure reference count overflow"
            );
            s.with_ref_count(s.ref_count() + 1)
        });
        if old.ref_count() == 0 {
            report(ClosureError::Dead(self.addr()));
        }
        self.clone()
    }

    /// Drop a reference. The last one invalidates the closure, runs its
    /// finalize notifiers and releases the callback and data.
    pub fn unref(&self) {
        let state = self.state();
        if state.ref_count() == 0 {
            report(ClosureError::Dead(self.addr()));
            return;
        }
        if state.ref_count() == 1 {
            self.invalidate();
        }
        let (old, _) = self
            .0
            .state
            .update(|s| s.with_ref_count(s.ref_count().saturating_sub(1)));
        if old.ref_count() == 1 {
            self.finalize();
        }
    }

    /// Claim the floating reference. Only the first call has an effect.
    pub fn sink(&self) {
        if !self.state().floating() {
            return;
        }
        let (old, _) = self.0.state.update(|s| s.with_floating(false));
        if old.floating() {
            self.unref();
        }
    }

    /// Mark the closure invalid and run its invalidate notifiers, once
    pub fn invalidate(&self) {
        if self.state().invalid() {
            return;
        }
        let _guard = self.add_ref();
        let (old, _) = self.0.state.update(|s| s.with_invalid(true));
        if !old.invalid() {
            self.run_notifiers(NotifyStage::Invalidate);
        }
        self.unref();
    }

    fn finalize(&self) {
        self.run_notifiers(NotifyStage::Finalize);
        let leftovers = std::mem::take(&mut self.0.notifiers.lock().slots);
        let callback = self.0.callback.write().take();
        let data = self.0.data.write().take();
        let marshal = self.0.marshal.write().take();
        drop((leftovers, callback, data, marshal));
    }

    fn pop_notifier(&self, stage: NotifyStage) -> Option<NotifyFn> {
        let mut table = self.0.notifiers.lock();
        let (old, _) = self.0.state.update(|s| match stage {
            NotifyStage::Finalize if s.n_fnotifiers() > 0 => {
                s.with_n_fnotifiers(s.n_fnotifiers() - 1)
            }
            NotifyStage::Invalidate if s.n_inotifiers() > 0 => {
                s.with_n_inotifiers(s.n_inotifiers() - 1)
            }
            _ => s,
        });
        let (offset, count) = match stage {
            NotifyStage::Finalize => (old.finalize_offset(), old.n_fnotifiers()),
            NotifyStage::Invalidate => (old.invalidate_offset(), old.n_inotifiers()),
        };
        if count == 0 {
            table.running = NotifierExecutionState::Idle;
            return None;
        }
        let notifier = table.slots.remove(offset + count as usize - 1).into_notify()?;
        table.running = NotifierExecutionState::Running {
            stage,
            notifier: notifier.clone(),
        };
        Some(notifier)
    }

    fn run_notifiers(&self, stage: NotifyStage) {
        if stage == NotifyStage::Invalidate {
            self.0.state.update(|s| s.with_in_inotify(true));
        }
        while let Some(notifier) = self.pop_notifier(stage) {
            notifier(self);
        }
        self.0.notifiers.lock().running = NotifierExecutionState::Idle;
        if stage == NotifyStage::Invalidate {
            self.0.state.update(|s| s.with_in_inotify(false));
        }
    }

    /// Set the marshaller. Setting a different one twice is refused.
    pub fn set_marshal(&self, marshal: MarshalFn) {
        let mut current = self.0.marshal.write();
        match current.as_ref() {
            Some(existing) if !Arc::ptr_eq(existing, &marshal) => {
                report(ClosureError::MarshalOverride(self.addr()));
            }
            _ => *current = Some(marshal),
        }
    }

    /// Install an indirection marshaller that runs instead of the plain one
    /// and receives `data`. Allowed once per closure.
    pub fn set_meta_marshal(&self, data: MarshalData, marshal: MarshalFn) {
        let mut table = self.0.notifiers.lock();
        let state = self.state();
        let err = if state.invalid() {
            Some(ClosureError::Invalid(self.addr()))
        } else if state.in_marshal() {
            Some(ClosureError::InMarshal(self.addr()))
        } else if state.meta_marshal() {
            Some(ClosureError::MetaMarshalSet(self.addr()))
        } else {
            None
        };
        if let Some(err) = err {
            report(err);
            return;
        }
        table
            .slots
            .insert(0, NotifierSlot::MetaMarshal { data, marshal });
        self.0.state.update(|s| s.with_meta_marshal(true));
    }

    /// Add a pair of notifiers run right before and after every marshal
    pub fn add_marshal_guards(&self, pre: NotifyFn, post: NotifyFn) {
        let mut table = self.0.notifiers.lock();
        let state = self.state();
        if state.invalid() {
            report(ClosureError::Invalid(self.addr()));
            return;
        }
        if state.in_marshal() {
            report(ClosureError::InMarshal(self.addr()));
            return;
        }
        assert!(state.n_guards() < MAX_GUARDS, "closure guard count overflow");
        let pre_at = state.guards_offset() + state.n_guards() as usize;
        table.slots.insert(pre_at, NotifierSlot::Notify(pre));
        table
            .slots
            .insert(state.finalize_offset() + 1, NotifierSlot::Notify(post));
        self.0.state.update(|s| s.with_n_guards(s.n_guards() + 1));
    }

    /// Register a notifier run once when the last reference goes away.
    ///
    /// # Panics
    ///
    /// Panics when the finalize notifier count would overflow.
    pub fn add_finalize_notifier(&self, notify: NotifyFn) {
        let mut table = self.0.notifiers.lock();
        let state = self.state();
        assert!(
            state.n_fnotifiers() < MAX_FNOTIFIERS,
            "closure finalize notifier count overflow"
        );
        table
            .slots
            .insert(state.invalidate_offset(), NotifierSlot::Notify(notify));
        self.0
            .state
            .update(|s| s.with_n_fnotifiers(s.n_fnotifiers() + 1));
    }

    /// Register a notifier run once on invalidation. Refused once invalid.
    pub fn add_invalidate_notifier(&self, notify: NotifyFn) {
        let mut table = self.0.notifiers.lock();
        let state = self.state();
        if state.invalid() {
            report(ClosureError::Invalid(self.addr()));
            return;
        }
        assert!(
            state.n_inotifiers() < MAX_INOTIFIERS,
            "closure invalidate notifier count overflow"
        );
        table.slots.push(NotifierSlot::Notify(notify));
        self.0
            .state
            .update(|s| s.with_n_inotifiers(s.n_inotifiers() + 1));
    }

    /// Unregister a finalize notifier. A notifier may remove itself while it runs.
    pub fn remove_finalize_notifier(&self, notify: &NotifyFn) {
        let mut table = self.0.notifiers.lock();
        if table.is_running(NotifyStage::Finalize, notify) {
            table.running = NotifierExecutionState::Idle;
            return;
        }
        let state = self.state();
        let start = state.finalize_offset();
        let end = state.invalidate_offset();
        match (start..end).find(|&i| table.slots[i].is(notify)) {
            Some(found) => {
                table.slots.swap(found, end - 1);
                table.slots.remove(end - 1);
                self.0
                    .state
                    .update(|s| s.with_n_fnotifiers(s.n_fnotifiers() - 1));
            }
            None => report(ClosureError::NotifierNotFound {
                kind: "finalize",
                closure: self.addr(),
            }),
        }
    }

    /// Unregister an invalidate notifier. A notifier may remove itself while it runs.
    pub fn remove_invalidate_notifier(&self, notify: &NotifyFn) {
        let mut table = self.0.notifiers.lock();
        if self.state().in_inotify() && table.is_running(NotifyStage::Invalidate, notify) {
            table.running = NotifierExecutionState::Idle;
            return;
        }
        let state = self.state();
        let start = state.invalidate_offset();
        let end = state.n_notifiers();
        match (start..end).find(|&i| table.slots[i].is(notify)) {
            Some(found) => {
                table.slots.swap_remove(found);
                self.0
                    .state
                    .update(|s| s.with_n_inotifiers(s.n_inotifiers() - 1));
            }
            None => report(ClosureError::NotifierNotFound {
                kind: "invalidate",
                closure: self.addr(),
            }),
        }
    }

    fn guards(&self, pre: bool) -> Vec<NotifyFn> {
        let table = self.0.notifiers.lock();
        let state = self.state();
        let n = state.n_guards() as usize;
        let start = state.guards_offset() + if pre { 0 } else { n };
        let guards = table.slots[start..start + n]
            .iter()
            .filter_map(|slot| slot.clone().into_notify());
        if pre {
            guards.collect()
        } else {
            guards.rev().collect()
        }
    }

    fn meta_marshal_slot(&self) -> Option<(MarshalData, MarshalFn)> {
        if !self.state().meta_marshal() {
            return None;
        }
        match self.0.notifiers.lock().slots.first() {
            Some(NotifierSlot::MetaMarshal { data, marshal }) => {
                Some((data.clone(), marshal.clone()))
            }
            _ => None,
        }
    }

    /// Call the closure. Does nothing once it is invalid.
    pub fn invoke(
        &self,
        return_value: Option<&mut Value>,
        params: &[Value],
        hint: Option<&InvocationHint>,
    ) {
        let _guard = self.add_ref();
        if !self.is_invalid() {
            let (old, _) = self.0.state.update(|s| s.with_in_marshal(true));
            let nested = old.in_marshal();
            let meta = self.meta_marshal_slot();
            let marshal = self.marshal();
            if meta.is_none() && marshal.is_none() {
                report(ClosureError::NoMarshal(self.addr()));
            } else {
                if !nested {
                    self.guards(true).iter().for_each(|guard| guard(self));
                }
                match (meta, marshal) {
                    (Some((data, meta_marshal)), _) => meta_marshal(
                        self,
                        Invocation {
                            return_value,
                            params,
                            hint,
                            marshal_data: Some(&data),
                        },
                    ),
                    (None, Some(marshal)) => marshal(
                        self,
                        Invocation {
                            return_value,
                            params,
                            hint,
                            marshal_data: None,
                        },
                    ),
                    (None, None) => {}
                }
                if !nested {
                    self.guards(false).iter().for_each(|guard| guard(self));
                }
            }
            self.0.state.update(|s| s.with_in_marshal(nested));
        }
        self.unref();
    }

    /// Current strong reference count
    pub fn ref_count(&self) -> u32 {
        self.state().ref_count()
    }

    /// Whether the initial reference has not been sunk yet
    pub fn is_floating(&self) -> bool {
        self.state().floating()
    }

    /// Whether [`Closure::invalidate`] has run
    pub fn is_invalid(&self) -> bool {
        self.state().invalid()
    }

    /// Whether an invocation is in progress
    pub fn in_marshal(&self) -> bool {
        self.state().in_marshal()
    }

    /// Whether a meta marshaller was installed
    pub fn has_meta_marshal(&self) -> bool {
        self.state().meta_marshal()
    }

    /// Whether the instance is passed last to the callback
    pub fn is_swapped(&self) -> bool {
        self.0.swapped
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Closure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The wrapped callback, if any
    pub fn callback(&self) -> Option<Callback> {
        self.0.callback.read().clone()
    }

    /// User data attached at construction
    pub fn data(&self) -> Option<ClosureData> {
        self.0.data.read().clone()
    }

    /// The plain marshaller, if one was set
    pub fn marshal(&self) -> Option<MarshalFn> {
        self.0.marshal.read().clone()
    }

    /// Whether a marshaller still has to be supplied before invocation
    pub fn needs_marshal(&self) -> bool {
        self.0.marshal.read().is_none()
    }

    /// The class slot a class-slot closure dispatches through
    pub(crate) fn class_slot(&self) -> Option<Quark> {
        let (data, _) = self.meta_marshal_slot()?;
        data.downcast_ref::<marshal::ClassSlot>()
            .map(|class_slot| class_slot.slot)
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("state", &self.state())
            .field("swapped", &self.0.swapped)
            .finish()
    }
}
