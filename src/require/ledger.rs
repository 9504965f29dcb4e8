//! Load ledger
//!
//! Tracks which resolved paths have finished loading and which are still
//! being loaded further up the call stack.

use std::collections::HashSet;

/// Insertion-ordered set of path strings
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    order: Vec<String>,
    index: HashSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    /// Add `path`, returning false if it was already present
    pub fn insert(&mut self, path: &str) -> bool {
        if !self.index.insert(path.to_string()) {
            return false;
        }
        self.order.push(path.to_string());
        true
    }

    pub fn remove(&mut self, path: &str) -> bool {
        if !self.index.remove(path) {
            return false;
        }
        self.order.retain(|p| p != path);
        true
    }

    /// Entries in insertion order
    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Ledger state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Fresh,
    Loaded,
    Loading,
}

/// `loaded` and `loading` path sets
#[derive(Debug, Clone, Default)]
pub struct LoadLedger {
    loaded: PathSet,
    loading: PathSet,
}

impl LoadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `loaded` is consulted before `loading`
    pub fn state(&self, path: &str) -> LoadState {
        if self.loaded.contains(path) {
            LoadState::Loaded
        } else if self.loading.contains(path) {
            LoadState::Loading
        } else {
            LoadState::Fresh
        }
    }

    /// Mark `path` as being loaded if it is fresh.
    ///
    /// Returns false when the path is already loaded or in progress, in which
    /// case the caller must not load it.
    pub fn check_and_mark(&mut self, path: &str) -> bool {
        match self.state(path) {
            LoadState::Fresh => self.loading.insert(path),
            LoadState::Loaded | LoadState::Loading => false,
        }
    }

    /// Move `path` from `loading` to `loaded`
    pub fn mark_loaded(&mut self, path: &str) {
        self.loading.remove(path);
        self.loaded.insert(path);
    }

    /// Forget an in-progress load that failed
    pub fn mark_failed(&mut self, path: &str) {
        self.loading.remove(path);
    }

    pub fn loaded(&self) -> &[String] {
        self.loaded.as_slice()
    }

    pub fn loading(&self) -> &[String] {
        self.loading.as_slice()
    }
}
