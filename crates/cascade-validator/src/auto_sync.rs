//! Hook the coordinator implements to let the healer pull in missing
//! orphan targets (spec §4.8 step 6, `--fix`'s `orphan_fks` path). Kept as
//! a trait rather than a direct dependency on the coordinator crate to
//! avoid a cycle: the coordinator depends on the validator, not the other
//! way around.

use async_trait::async_trait;
use cascade_core::PointId;

/// Triggers a bounded cascade sync of specific missing target records.
#[async_trait]
pub trait AutoSyncer: Send + Sync {
    /// Syncs the records in `ids` for `target_model`. Implementations are
    /// expected to bound the work (no unbounded re-cascade).
    async fn sync_missing(&self, target_model: &str, ids: &[PointId]) -> Result<(), String>;
}
