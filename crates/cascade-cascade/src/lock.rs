//! Process-local exclusive sync locks, keyed by model (spec §4.6,
//! "Locks"): before starting a sync for model `M`, take an exclusive lock
//! keyed by `M`; a second request for the same `M` returns immediately
//! with the elapsed time and a progress description of the in-flight sync,
//! rather than blocking or queuing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;

struct LockState {
    started_at: Instant,
    progress: SyncMutex<String>,
}

/// Reported back to the caller when a model is already being synced.
#[derive(Debug, Clone)]
pub struct LockContention {
    pub elapsed: Duration,
    pub progress: String,
}

/// Registry of per-model exclusive locks, shared across the coordinator's
/// worker pool. Cheap to clone (wraps an `Arc<DashMap<..>>` internally via
/// the registry being held behind its own `Arc` by callers).
#[derive(Default)]
pub struct SyncLockRegistry {
    locks: DashMap<String, LockState>,
}

impl SyncLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock for `model`. On contention, returns the
    /// elapsed time and last-reported progress of the holder instead of
    /// blocking.
    pub fn try_acquire(self: &Arc<Self>, model: &str) -> Result<SyncLockGuard, LockContention> {
        match self.locks.entry(model.to_string()) {
            Entry::Occupied(entry) => Err(LockContention {
                elapsed: entry.get().started_at.elapsed(),
                progress: entry.get().progress.lock().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(LockState {
                    started_at: Instant::now(),
                    progress: SyncMutex::new("starting".to_string()),
                });
                Ok(SyncLockGuard { registry: self.clone(), model: model.to_string() })
            }
        }
    }

    /// Updates the best-effort progress description shown to a contending caller.
    pub fn set_progress(&self, model: &str, progress: impl Into<String>) {
        if let Some(state) = self.locks.get(model) {
            *state.progress.lock() = progress.into();
        }
    }
}

/// Holds the exclusive lock for one model; releases it on drop, on every
/// exit path (spec §4.6: "release on all exit paths").
#[must_use]
pub struct SyncLockGuard {
    registry: Arc<SyncLockRegistry>,
    model: String,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.registry.locks.remove(&self.model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_the_same_model_reports_contention() {
        let registry = Arc::new(SyncLockRegistry::new());
        let guard = registry.try_acquire("lead").unwrap();
        registry.set_progress("lead", "batch 3/10");

        let contention = registry.try_acquire("lead").unwrap_err();
        assert_eq!(contention.progress, "batch 3/10");

        drop(guard);
        assert!(registry.try_acquire("lead").is_ok());
    }

    #[test]
    fn distinct_models_do_not_contend() {
        let registry = Arc::new(SyncLockRegistry::new());
        let _a = registry.try_acquire("lead").unwrap();
        assert!(registry.try_acquire("partner").is_ok());
    }
}
