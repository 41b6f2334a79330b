//! Tuning knobs for a [`crate::coordinator::Coordinator`] (spec §4.6).

/// Default worker-pool width for dependency expansion.
pub const DEFAULT_PARALLEL_TARGETS: u8 = 3;
/// Default maximum cascade depth from the origin model.
pub const DEFAULT_DEPTH_CAP: u32 = 5;
/// Default page size for the primary/sub-sync extraction loop.
pub const DEFAULT_BATCH_SIZE: u64 = 200;

/// Coordinator-wide defaults, overridable per [`crate::coordinator::CascadeRequest`].
#[derive(Debug, Clone, Copy)]
pub struct CascadeConfig {
    /// Worker-pool width for dependency expansion, clamped to `1..=10` (spec §4.6).
    pub parallel_targets: u8,
    /// Maximum hops from the origin model before expansion stops.
    pub depth_cap: u32,
    /// Whether a dependency sub-sync probes the sink and skips ids already present.
    pub skip_existing: bool,
    /// Extraction page size.
    pub batch_size: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            parallel_targets: DEFAULT_PARALLEL_TARGETS,
            depth_cap: DEFAULT_DEPTH_CAP,
            skip_existing: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl CascadeConfig {
    #[must_use]
    pub fn with_parallel_targets(mut self, parallel_targets: u8) -> Self {
        self.parallel_targets = parallel_targets.clamp(1, 10);
        self
    }

    #[must_use]
    pub fn with_depth_cap(mut self, depth_cap: u32) -> Self {
        self.depth_cap = depth_cap;
        self
    }
}
