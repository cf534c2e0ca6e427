//! Sorted array with binary-search lookup
//!
//! Backs the signal name index, the per-instance handler list index and the
//! per-signal class closure table. Entries are ordered by the key their
//! [`Keyed`] implementation reports; at most one entry exists per key.


/// An entry that can be stored in a [`SortedArray`]
pub trait Keyed {
    type Key: Ord + Copy;

    fn key(&self) -> Self::Key;
}

/// A dynamic array kept ordered by [`Keyed::key`]
#[derive(Debug, Clone)]
pub struct SortedArray<T> {
    nodes: Vec<T>,
}

impl<T> Default for SortedArray<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: Keyed> SortedArray<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn search(&self, key: &T::Key) -> Result<usize, usize> {
        self.nodes.binary_search_by(|node| node.key().cmp(key))
    }

    /// Insert `node` keeping the array ordered.
    ///
    /// Returns `false` and leaves the array untouched if an entry with the
    /// same key already exists.
    pub fn insert(&mut self, node: T) -> bool {
        match self.search(&node.key()) {
            Ok(_) => false,
            Err(position) => {
                self.nodes.insert(position, node);
                true
            }
        }
    }

    /// Insert `node`, replacing any entry with the same key
    pub fn replace(&mut self, node: T) -> Option<T> {
        match self.search(&node.key()) {
            Ok(position) => Some(std::mem::replace(&mut self.nodes[position], node)),
            Err(position) => {
                self.nodes.insert(position, node);
                None
            }
        }
    }

    pub fn lookup(&self, key: &T::Key) -> Option<&T> {
        self.search(key).ok().map(|position| &self.nodes[position])
    }

    pub fn lookup_mut(&mut self, key: &T::Key) -> Option<&mut T> {
        match self.search(key) {
            Ok(position) => Some(&mut self.nodes[position]),
            Err(_) => None,
        }
    }

    /// Get or insert the entry for `key`
    pub fn ensure(&mut self, key: T::Key, init: impl FnOnce() -> T) -> &mut T {
        let position = match self.search(&key) {
            Ok(position) => position,
            Err(position) => {
                let node = init();
                debug_assert!(node.key() == key, "initializer produced a different key");
                self.nodes.insert(position, node);
                position
            }
        };
        &mut self.nodes[position]
    }

    pub fn nth(&self, index: usize) -> Option<&T> {
        self.nodes.get(index)
    }

    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        self.search(key)
            .ok()
            .map(|position| self.nodes.remove(position))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.nodes.iter()
    }

    /// Remove every entry, handing them back in key order
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.nodes.drain(..)
    }
}

impl<'a, T: Keyed> IntoIterator for &'a SortedArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
