//! Signals: named, typed events declared on types and emitted on instances.
//!
//! The registry maps `(owner type, name)` to signal metadata, the handler
//! table keeps per-instance lists of connected closures and the emission
//! engine walks class closures, emission hooks and handlers in a fixed stage
//! order. All three share one process-wide lock, which is released around
//! every call into user code so callbacks may freely connect, disconnect and
//! emit.
//!
//! Misuse is reported through `tracing` and degrades to a no-op with a
//! sentinel return (`None`, `false`, `0`); capacity overflows panic.
//!
//! # Example
//! ```
//! use relay_core::signal::{self, SignalBuilder, SignalFlags};
//! use relay_core::{Object, Type, Value};
//!
//! let button = Type::register_object("DocButton", Type::OBJECT).unwrap();
//! SignalBuilder::new("clicked", button)
//!     .flags(SignalFlags::RUN_LAST)
//!     .build()
//!     .unwrap();
//!
//! let instance = Object::new(button).unwrap();
//! signal::connect(&instance, "clicked", |_| {
//!     println!("clicked!");
//!     Value::None
//! });
//! signal::emit_by_name(&instance, "clicked", &[]);
//! ```

#[cfg(test)]
mod tests;

mod accumulator;
mod builder;
mod emission;
mod handler;
mod hooks;
mod registry;

pub use accumulator::{AccumulatorFn, accumulator_first_wins, accumulator_true_handled};
pub use builder::SignalBuilder;
pub use emission::{
    chain_from_overridden, emit, emit_by_name, emitv, get_invocation_hint, stop_emission,
    stop_emission_by_name,
};
pub use handler::{
    connect, connect_after, connect_closure, connect_closure_by_id, connect_data,
    handler_block, handler_disconnect, handler_find, handler_is_connected, handler_unblock,
    handlers_block_matched, handlers_destroy, handlers_disconnect_matched,
    handlers_unblock_matched, has_handler_pending,
};
pub use hooks::{DestroyNotify, EmissionHookFn, add_emission_hook, remove_emission_hook};
pub use registry::{
    destroy, destroy_for_type, list_ids, lookup, name, override_class_closure,
    override_class_handler, parse_name, query,
};
pub(crate) use registry::instance_dropped;

use crate::closure::{Callback, Closure, ClosureData};
use crate::error::SignalError;
use crate::quark::Quark;
use crate::types::Type;
use bitflags::bitflags;
use std::fmt;
use std::num::NonZeroU32;

/// Dense, never reused identifier of a registered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalId(NonZeroU32);

impl SignalId {
    fn from_index(index: usize) -> SignalId {
        u32::try_from(index + 1)
            .ok()
            .and_then(NonZeroU32::new)
            .map(SignalId)
            .unwrap_or_else(|| panic!("signal id space exhausted"))
    }

    fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a connected handler, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an emission hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(u64);

impl HookId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Behaviour of a signal
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SignalFlags: u32 {
        /// Run the class closure before handlers
        const RUN_FIRST = 1 << 0;
        /// Run the class closure between before and after handlers
        const RUN_LAST = 1 << 1;
        /// Run the class closure last, even after a stop
        const RUN_CLEANUP = 1 << 2;
        /// Collapse a nested emission on the same instance into a restart
        const NO_RECURSE = 1 << 3;
        /// Accept a `::detail` suffix on connect and emit
        const DETAILED = 1 << 4;
        const ACTION = 1 << 5;
        /// Refuse emission hooks
        const NO_HOOKS = 1 << 6;
        const MUST_COLLECT = 1 << 7;
        const DEPRECATED = 1 << 8;
        /// Only seen in invocation hints: no accumulation has happened yet
        const ACCUMULATOR_FIRST_RUN = 1 << 17;
    }
}

impl SignalFlags {
    /// Flags a signal may be registered with
    pub(crate) const REGISTRABLE: SignalFlags = SignalFlags::all()
        .difference(SignalFlags::ACCUMULATOR_FIRST_RUN);

    pub(crate) const RUN_STAGES: SignalFlags = SignalFlags::RUN_FIRST
        .union(SignalFlags::RUN_LAST)
        .union(SignalFlags::RUN_CLEANUP);
}

bitflags! {
    /// How a callback is connected
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConnectFlags: u8 {
        /// Run in the after stage
        const AFTER = 1 << 0;
        /// Pass the instance as the last parameter
        const SWAPPED = 1 << 1;
    }
}

bitflags! {
    /// Which fields of a [`MatchCriteria`] are compared
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MatchType: u8 {
        const ID = 1 << 0;
        const DETAIL = 1 << 1;
        const CLOSURE = 1 << 2;
        const FUNC = 1 << 3;
        const DATA = 1 << 4;
        const UNBLOCKED = 1 << 5;
    }
}

impl MatchType {
    /// At least one of these is needed for bulk operations
    pub(crate) const SELECTIVE: MatchType = MatchType::ID
        .union(MatchType::CLOSURE)
        .union(MatchType::FUNC)
        .union(MatchType::DATA);
}

/// What a closure invoked during an emission is told about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationHint {
    pub signal_id: SignalId,
    pub detail: Option<Quark>,
    /// The stage being run, plus [`SignalFlags::ACCUMULATOR_FIRST_RUN`]
    pub run_type: SignalFlags,
}

/// Snapshot of a signal's registration
#[derive(Debug, Clone, PartialEq)]
pub struct SignalQuery {
    pub signal_id: SignalId,
    pub signal_name: &'static str,
    pub itype: Type,
    pub flags: SignalFlags,
    pub return_type: Type,
    pub param_types: Vec<Type>,
}

/// Selects handlers for [`handler_find`] and the bulk operations.
///
/// Every setter also enables the matching [`MatchType`] bit.
///
/// ```
/// use relay_core::signal::{MatchCriteria, MatchType};
///
/// let criteria = MatchCriteria::new().detail(None).unblocked();
/// assert_eq!(criteria.mask(), MatchType::DETAIL | MatchType::UNBLOCKED);
/// ```
#[derive(Clone, Default)]
pub struct MatchCriteria {
    mask: MatchType,
    signal_id: Option<SignalId>,
    detail: Option<Quark>,
    closure: Option<Closure>,
    func: Option<Callback>,
    data: Option<ClosureData>,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match handlers of `signal_id`
    pub fn signal(mut self, signal_id: SignalId) -> Self {
        self.mask |= MatchType::ID;
        self.signal_id = Some(signal_id);
        self
    }

    /// Match handlers connected with exactly this detail
    pub fn detail(mut self, detail: Option<Quark>) -> Self {
        self.mask |= MatchType::DETAIL;
        self.detail = detail;
        self
    }

    /// Match handlers using this exact closure
    pub fn closure(mut self, closure: &Closure) -> Self {
        self.mask |= MatchType::CLOSURE;
        self.closure = Some(closure.clone());
        self
    }

    /// Match plain callback closures wrapping `func`
    pub fn func(mut self, func: &Callback) -> Self {
        self.mask |= MatchType::FUNC;
        self.func = Some(func.clone());
        self
    }

    /// Match handlers whose closure carries this user data
    pub fn data(mut self, data: Option<&ClosureData>) -> Self {
        self.mask |= MatchType::DATA;
        self.data = data.cloned();
        self
    }

    /// Skip blocked handlers
    pub fn unblocked(mut self) -> Self {
        self.mask |= MatchType::UNBLOCKED;
        self
    }

    pub fn mask(&self) -> MatchType {
        self.mask
    }
}

impl fmt::Debug for MatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchCriteria")
            .field("mask", &self.mask)
            .field("signal_id", &self.signal_id)
            .field("detail", &self.detail)
            .field("closure", &self.closure)
            .field("func", &self.func.is_some())
            .field("data", &self.data.is_some())
            .finish()
    }
}

/// `-` and `_` are interchangeable in signal names; `-` is canonical
pub(crate) fn canonical_name(name: &str) -> String {
    name.replace('_', "-")
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

fn report(err: SignalError) {
    tracing::warn!(%err, "signal misuse");
}
