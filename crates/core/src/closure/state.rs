//! Packed closure state word.
//!
//! Layout, least significant bit first:
//!
//! | bits  | field          |
//! |-------|----------------|
//! | 0-14  | ref count      |
//! | 15    | meta marshal   |
//! | 16    | guard pairs    |
//! | 17-18 | finalize count |
//! | 19-26 | invalidate cnt |
//! | 27    | in inotify     |
//! | 28    | floating       |
//! | 30    | in marshal     |
//! | 31    | invalid        |

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const MAX_REF_COUNT: u32 = (1 << 15) - 1;
pub(crate) const MAX_GUARDS: u32 = 1;
pub(crate) const MAX_FNOTIFIERS: u32 = (1 << 2) - 1;
pub(crate) const MAX_INOTIFIERS: u32 = (1 << 8) - 1;

const REF_SHIFT: u32 = 0;
const META_BIT: u32 = 1 << 15;
const GUARDS_SHIFT: u32 = 16;
const FNOTIFIERS_SHIFT: u32 = 17;
const INOTIFIERS_SHIFT: u32 = 19;
const IN_INOTIFY_BIT: u32 = 1 << 27;
const FLOATING_BIT: u32 = 1 << 28;
const IN_MARSHAL_BIT: u32 = 1 << 30;
const INVALID_BIT: u32 = 1 << 31;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ClosureState(u32);

impl ClosureState {
    /// Fresh closure: one floating reference
    pub(crate) fn initial() -> Self {
        ClosureState(0).with_ref_count(1).with_floating(true)
    }

    fn field(self, shift: u32, max: u32) -> u32 {
        (self.0 >> shift) & max
    }

    fn with_field(self, shift: u32, max: u32, value: u32) -> Self {
        debug_assert!(value <= max);
        ClosureState((self.0 & !(max << shift)) | ((value & max) << shift))
    }

    fn flag(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    fn with_flag(self, bit: u32, on: bool) -> Self {
        if on {
            ClosureState(self.0 | bit)
        } else {
            ClosureState(self.0 & !bit)
        }
    }

    pub(crate) fn ref_count(self) -> u32 {
        self.field(REF_SHIFT, MAX_REF_COUNT)
    }

    pub(crate) fn with_ref_count(self, n: u32) -> Self {
        self.with_field(REF_SHIFT, MAX_REF_COUNT, n)
    }

    pub(crate) fn meta_marshal(self) -> bool {
        self.flag(META_BIT)
    }

    pub(crate) fn with_meta_marshal(self, on: bool) -> Self {
        self.with_flag(META_BIT, on)
    }

    pub(crate) fn n_guards(self) -> u32 {
        self.field(GUARDS_SHIFT, MAX_GUARDS)
    }

    pub(crate) fn with_n_guards(self, n: u32) -> Self {
        self.with_field(GUARDS_SHIFT, MAX_GUARDS, n)
    }

    pub(crate) fn n_fnotifiers(self) -> u32 {
        self.field(FNOTIFIERS_SHIFT, MAX_FNOTIFIERS)
    }

    pub(crate) fn with_n_fnotifiers(self, n: u32) -> Self {
        self.with_field(FNOTIFIERS_SHIFT, MAX_FNOTIFIERS, n)
    }

    pub(crate) fn n_inotifiers(self) -> u32 {
        self.field(INOTIFIERS_SHIFT, MAX_INOTIFIERS)
    }

    pub(crate) fn with_n_inotifiers(self, n: u32) -> Self {
        self.with_field(INOTIFIERS_SHIFT, MAX_INOTIFIERS, n)
    }

    pub(crate) fn in_inotify(self) -> bool {
        self.flag(IN_INOTIFY_BIT)
    }

    pub(crate) fn with_in_inotify(self, on: bool) -> Self {
        self.with_flag(IN_INOTIFY_BIT, on)
    }

    pub(crate) fn floating(self) -> bool {
        self.flag(FLOATING_BIT)
    }

    pub(crate) fn with_floating(self, on: bool) -> Self {
        self.with_flag(FLOATING_BIT, on)
    }

    pub(crate) fn in_marshal(self) -> bool {
        self.flag(IN_MARSHAL_BIT)
    }

    pub(crate) fn with_in_marshal(self, on: bool) -> Self {
        self.with_flag(IN_MARSHAL_BIT, on)
    }

    pub(crate) fn invalid(self) -> bool {
        self.flag(INVALID_BIT)
    }

    pub(crate) fn with_invalid(self, on: bool) -> Self {
        self.with_flag(INVALID_BIT, on)
    }

    /// Index of the first pre guard in the notifier table
    pub(crate) fn guards_offset(self) -> usize {
        usize::from(self.meta_marshal())
    }

    pub(crate) fn finalize_offset(self) -> usize {
        self.guards_offset() + 2 * self.n_guards() as usize
    }

    pub(crate) fn invalidate_offset(self) -> usize {
        self.finalize_offset() + self.n_fnotifiers() as usize
    }

    pub(crate) fn n_notifiers(self) -> usize {
        self.invalidate_offset() + self.n_inotifiers() as usize
    }
}

impl fmt::Debug for ClosureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureState")
            .field("ref_count", &self.ref_count())
            .field("meta_marshal", &self.meta_marshal())
            .field("n_guards", &self.n_guards())
            .field("n_fnotifiers", &self.n_fnotifiers())
            .field("n_inotifiers", &self.n_inotifiers())
            .field("in_inotify", &self.in_inotify())
            .field("floating", &self.floating())
            .field("in_marshal", &self.in_marshal())
            .field("invalid", &self.invalid())
            .finish()
    }
}

/// A [`ClosureState`] updated by compare-and-swap
pub(crate) struct AtomicState(AtomicU32);

impl AtomicState {
    pub(crate) fn new(state: ClosureState) -> Self {
        AtomicState(AtomicU32::new(state.0))
    }

    pub(crate) fn load(&self) -> ClosureState {
        ClosureState(self.0.load(Ordering::Acquire))
    }

    /// Apply `f` until the swap succeeds, returning the old and new state
    pub(crate) fn update(
        &self,
        mut f: impl FnMut(ClosureState) -> ClosureState,
    ) -> (ClosureState, ClosureState) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = f(ClosureState(current));
            match self.0.compare_exchange_weak(
                current,
                next.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (ClosureState(current), next),
                Err(actual) => current = actual,
            }
        }
    }
}
