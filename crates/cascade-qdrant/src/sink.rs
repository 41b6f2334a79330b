//! The vector sink contract (spec §4.5): one shared collection, a static
//! set of indexed payload fields, and the operations the rest of the
//! engine is allowed to assume exist regardless of which vector database
//! backs it.

use async_trait::async_trait;
use cascade_core::PointId;

use crate::filter::SinkFilter;
use crate::point::PointRecord;

/// Payload field kinds the sink can build a payload index for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Keyword,
    Integer,
    Bool,
}

/// One page of a scroll/pagination call.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub records: Vec<PointRecord>,
    /// Opaque cursor for the next page; `None` once exhausted.
    pub next_offset: Option<PointId>,
}

/// Failure talking to the backing vector database.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("vector sink request failed: {0}")]
    Request(String),
    #[error("malformed request: {0}")]
    Malformed(String),
}

/// The operations the cascade engine needs from its vector database
/// (spec §4.5). Abstracts the concrete engine (HNSW, scalar quantization,
/// etc.) behind one trait so the coordinator, validator and query engine
/// never see a database-specific type.
#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Inserts or replaces points by id.
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<(), SinkError>;

    /// Pages through points matching `filter`, starting from `cursor`
    /// (`None` for the first page).
    async fn scroll(&self, filter: Option<&SinkFilter>, cursor: Option<PointId>, limit: u32) -> Result<ScrollPage, SinkError>;

    /// Retrieves points by id; missing ids are silently omitted.
    async fn retrieve(&self, ids: &[PointId]) -> Result<Vec<PointRecord>, SinkError>;

    /// Deletes by explicit id list.
    async fn delete_by_ids(&self, ids: &[PointId]) -> Result<(), SinkError>;

    /// Deletes every point matching `filter`.
    async fn delete_by_filter(&self, filter: &SinkFilter) -> Result<(), SinkError>;

    /// Ensures a payload index exists for `field` (idempotent).
    async fn create_payload_index(&self, field: &str, kind: IndexKind) -> Result<(), SinkError>;

    /// Counts points matching `filter` (`None` counts the whole collection).
    async fn count(&self, filter: Option<&SinkFilter>) -> Result<u64, SinkError>;

    /// Nearest-neighbor search, optionally constrained by `filter`.
    async fn search(&self, vector: &[f32], filter: Option<&SinkFilter>, k: u64) -> Result<Vec<(PointRecord, f32)>, SinkError>;
}

/// Payload fields the sink is pre-configured to index (spec §4.5): filters
/// referencing any other field must be rejected before reaching the sink.
pub const INDEXED_FIELDS: &[(&str, IndexKind)] = &[
    ("model_name", IndexKind::Keyword),
    ("record_id", IndexKind::Integer),
    ("point_type", IndexKind::Keyword),
    ("date", IndexKind::Keyword),
    ("is_leaf", IndexKind::Bool),
    ("source_model", IndexKind::Keyword),
    ("target_model", IndexKind::Keyword),
];

/// Whether `field` is in the static indexed list.
#[must_use]
pub fn is_indexed_field(field: &str) -> bool {
    INDEXED_FIELDS.iter().any(|(name, _)| *name == field)
}
