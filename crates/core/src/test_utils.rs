//! Shared helpers for unit tests.
//!
//! Every test shares the process-wide type and signal registries, so names
//! handed out here are made unique per call.

use crate::types::Type;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_SUFFIX: AtomicUsize = AtomicUsize::new(1);

/// `prefix` followed by a process-unique suffix
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}{}", NEXT_SUFFIX.fetch_add(1, Ordering::Relaxed))
}

/// Register a fresh object type deriving directly from `Object`
pub fn object_type(prefix: &str) -> Type {
    Type::register_object(&unique_name(prefix), Type::OBJECT)
        .expect("unique test type names never collide")
}

/// Register a fresh object type deriving from `parent`
pub fn derived_type(prefix: &str, parent: Type) -> Type {
    Type::register_object(&unique_name(prefix), parent)
        .expect("unique test type names never collide")
}

/// Thread-safe ordered record of what ran
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}
