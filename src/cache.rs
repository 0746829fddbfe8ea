//! Single-flight availability cache.
//!
//! The full availability check spawns subprocesses, so it runs at most once
//! per resolved script path for the lifetime of the process. Entries are
//! never recomputed even if the underlying files change; cheap repeated
//! checks are traded for staleness deliberately.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Compute-once-per-key memoization of availability checks.
///
/// Concurrent first-time callers for the same key coalesce into a single
/// computation (`OnceLock::get_or_init` blocks the losers); later callers
/// get the memoized boolean without spawning anything.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    entries: Mutex<HashMap<PathBuf, Arc<OnceLock<bool>>>>,
}

impl AvailabilityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        AvailabilityCache::default()
    }

    /// Return the cached result for `key`, computing it on first use.
    pub fn get_or_compute(&self, key: &Path, compute: impl FnOnce() -> bool) -> bool {
        let cell = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries.entry(key.to_path_buf()).or_default().clone()
        };
        // The map lock is released before the potentially slow computation.
        *cell.get_or_init(compute)
    }

    /// Whether a result has already been computed for `key`.
    pub fn contains(&self, key: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|cell| cell.get().is_some())
    }
}
