//! Interned strings.
//!
//! Quarks key the signal name index and qualify emissions with a detail.
//! Interned strings live for the rest of the process, so `as_str` hands out
//! `&'static str` without copying.

use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

/// A process-wide interned string identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quark(NonZeroU32);

#[derive(Default)]
struct QuarkTable {
    by_name: HashMap<&'static str, Quark, RandomState>,
    names: Vec<&'static str>,
}

static QUARKS: Lazy<RwLock<QuarkTable>> = Lazy::new(|| RwLock::new(QuarkTable::default()));

impl Quark {
    /// Intern `name`, returning the existing quark if it was seen before
    pub fn intern(name: &str) -> Quark {
        if let Some(quark) = Self::lookup(name) {
            return quark;
        }

        let mut table = QUARKS.write();
        // Another thread may have interned it between the two locks
        if let Some(quark) = table.by_name.get(name) {
            return *quark;
        }

        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        table.names.push(leaked);
        let index = u32::try_from(table.names.len()).expect("quark space exhausted");
        let quark = Quark(NonZeroU32::new(index).expect("quark indices start at one"));
        table.by_name.insert(leaked, quark);
        quark
    }

    /// Find the quark for `name` without interning it
    pub fn lookup(name: &str) -> Option<Quark> {
        QUARKS.read().by_name.get(name).copied()
    }

    /// The interned string
    pub fn as_str(self) -> &'static str {
        let table = QUARKS.read();
        table.names[(self.0.get() - 1) as usize]
    }

    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quark({:?})", self.as_str())
    }
}

impl fmt::Display for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
