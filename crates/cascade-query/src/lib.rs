//! The exact query engine (spec §4.9): filter translation, streaming
//! aggregation, FK link resolution, bounded graph/validation/similarity
//! enrichment, and response shaping over the shared vector sink.

pub mod aggregator;
pub mod engine;
pub mod enrichment;
pub mod filter;
pub mod link;
pub mod shaping;

pub use aggregator::{AggOp, Aggregation, Aggregator, GroupResult, ReconciliationChecksum};
pub use engine::{AggregationResult, QueryEngine, QueryRequest, QueryResponse};
pub use enrichment::{MAX_ENRICHED_RECORDS, MAX_SIMILAR_LIMIT};
pub use filter::{Condition, Op, PlannedFilter, BOOLEAN_ESCAPE_FIELDS};
pub use link::{resolve_link, resolve_link_json, DEFAULT_LINK_FIELDS};
pub use shaping::{
    estimate_grouped_aggregation_tokens, estimate_record_mode_tokens, estimate_simple_aggregation_tokens,
    export_descriptor, recommend_detail_level, shape_groups, DetailLevel, ExportDescriptor, DEFAULT_TOKEN_THRESHOLD,
};
