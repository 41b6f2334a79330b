//! Shapes returned by a validation run (spec §4.8).

/// How a forward/reverse consistency check came out for one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discrepancy {
    /// Both forward and reverse checks passed.
    None,
    /// The graph's counters drifted from the measured totals.
    StaleGraph,
    /// Live data references targets the sink no longer has.
    OrphanFks,
    /// Both problems on the same edge.
    Both,
}

impl Discrepancy {
    #[must_use]
    pub fn classify(forward_ok: bool, reverse_ok: bool) -> Self {
        match (forward_ok, reverse_ok) {
            (true, true) => Self::None,
            (false, true) => Self::StaleGraph,
            (true, false) => Self::OrphanFks,
            (false, false) => Self::Both,
        }
    }
}

/// Outcome of validating one FK field on one model.
#[derive(Debug, Clone)]
pub struct FieldReport {
    pub model: String,
    pub field_name: String,
    pub target_model: String,
    pub graph_metadata_used: bool,
    pub actual_fk_count: u64,
    pub actual_unique_targets: u64,
    pub edge_count: u64,
    pub orphan_count: u64,
    pub integrity_score: f64,
    pub discrepancy: Discrepancy,
    pub fixed: bool,
}

/// Outcome of validating one model: either its field reports, or an
/// isolated error that did not abort the whole run (spec §4.8, "Per-model
/// errors are isolated").
#[derive(Debug, Clone)]
pub enum ModelReport {
    Ok { model: String, fields: Vec<FieldReport> },
    Failed { model: String, error: String },
}

/// Aggregate result of a validation run across every discovered model.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub models: Vec<ModelReport>,
    /// Count of orphan samples dropped once the global cap was reached.
    pub orphan_samples_truncated: u64,
    /// Count of fix attempts that errored (spec §4.8, "Fix errors are
    /// counted and reported; no partial edge writes").
    pub fix_errors: u64,
}

impl ValidationReport {
    #[must_use]
    pub fn total_orphans(&self) -> u64 {
        self.models
            .iter()
            .filter_map(|m| match m {
                ModelReport::Ok { fields, .. } => Some(fields.iter().map(|f| f.orphan_count).sum::<u64>()),
                ModelReport::Failed { .. } => None,
            })
            .sum()
    }
}
