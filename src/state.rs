// EN: src/state.rs

use crate::core::cache::{CacheError, CacheStore};
use std::ops::{Deref, DerefMut};

/// Owns the cache store for the length of one invocation and flushes it
/// exactly once: either explicitly through [`StoreGuard::commit`], or when the
/// guard is dropped, which also covers early returns and error paths.
///
/// Nothing is written when the store reports no pending changes.
#[derive(Debug)]
pub struct StoreGuard {
    store: Option<CacheStore>,
}

impl StoreGuard {
    pub fn new(store: CacheStore) -> Self {
        Self { store: Some(store) }
    }

    /// Flushes now and reports the outcome. After this the guard is spent and
    /// its drop does nothing.
    pub fn commit(mut self) -> Result<(), CacheError> {
        match self.store.take() {
            Some(mut store) if store.needs_saving() => store.save(),
            _ => Ok(()),
        }
    }

    /// Releases the store without flushing it.
    pub fn into_inner(mut self) -> CacheStore {
        self.store.take().unwrap_or_else(|| spent_guard())
    }
}

impl Deref for StoreGuard {
    type Target = CacheStore;

    fn deref(&self) -> &Self::Target {
        // The store is only taken by `commit`, which consumes the guard.
        self.store.as_ref().unwrap_or_else(|| spent_guard())
    }
}

impl DerefMut for StoreGuard {
    fn deref_mut(&mut self) -> &mut CacheStore {
        self.store.as_mut().unwrap_or_else(|| spent_guard())
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if !store.needs_saving() {
            return;
        }
        if let Err(e) = store.save() {
            // Drop cannot report errors; the next invocation starts from the
            // previous file, which the atomic write left intact.
            log::warn!(
                "Failed to save cache to '{}': {}",
                store.path().display(),
                e
            );
        }
    }
}

#[allow(clippy::panic)]
fn spent_guard() -> ! {
    panic!("store guard used after commit")
}
