//! Per-model and whole-cascade result reporting (spec §4.6 step 9: "each
//! model reports its own fetched/upserted/failed counts, duration, sync
//! type, restricted fields, dependency counts and errors independently").

use std::collections::HashMap;
use std::time::Duration;

/// Whether a model sync was scoped by watermark, by an explicit id list
/// (a cascade dependency sub-sync, or a manually requested id-scoped
/// run), or covered every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// No watermark; every matching record was read.
    Full,
    /// `write_date > watermark`.
    Incremental,
    /// Restricted to an explicit id list (FK dependency expansion, or a
    /// caller-supplied `--record-ids`).
    Targeted,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
            SyncType::Targeted => "targeted",
        };
        f.write_str(s)
    }
}

/// Outcome of one model's sync within a cascade run.
#[derive(Debug, Clone)]
pub struct ModelSyncResult {
    pub model: String,
    pub sync_type: SyncType,
    pub depth: u32,
    pub records_fetched: u64,
    pub records_upserted: u64,
    pub records_failed: u64,
    pub duration: Duration,
    pub restricted_fields: Vec<String>,
    pub dependency_models: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl ModelSyncResult {
    #[must_use]
    pub fn new(model: impl Into<String>, sync_type: SyncType, depth: u32, dry_run: bool) -> Self {
        Self {
            model: model.into(),
            sync_type,
            depth,
            records_fetched: 0,
            records_upserted: 0,
            records_failed: 0,
            duration: Duration::ZERO,
            restricted_fields: Vec::new(),
            dependency_models: Vec::new(),
            errors: Vec::new(),
            dry_run,
        }
    }

    /// A degenerate result for a model that failed before any record was read.
    #[must_use]
    pub fn failed(model: impl Into<String>, sync_type: SyncType, error: impl Into<String>) -> Self {
        let mut result = Self::new(model, sync_type, 0, false);
        result.errors.push(error.into());
        result
    }
}

/// Outcome of one model-level sync attempt within a cascade: either it ran,
/// or it found the model already being synced elsewhere (spec §4.6, "Locks").
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(ModelSyncResult),
    AlreadyInProgress { model: String, elapsed: Duration, progress: String },
}

impl SyncOutcome {
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            SyncOutcome::Completed(r) => &r.model,
            SyncOutcome::AlreadyInProgress { model, .. } => model,
        }
    }
}

/// The whole cascade's result: the origin model's outcome plus every
/// dependency reached while cascading (spec §4.6 step 9).
#[derive(Debug, Clone)]
pub struct CascadeResult {
    pub origin: String,
    pub request_id: String,
    pub total_duration: Duration,
    pub outcomes: HashMap<String, SyncOutcome>,
    pub depth_reached: u32,
    pub cycles_skipped: u64,
}

impl CascadeResult {
    #[must_use]
    pub fn origin_outcome(&self) -> Option<&SyncOutcome> {
        self.outcomes.get(&self.origin)
    }

    #[must_use]
    pub fn had_errors(&self) -> bool {
        self.outcomes.values().any(|o| matches!(o, SyncOutcome::Completed(r) if !r.errors.is_empty()))
    }
}
