//! The vector sink contract (spec §4.5) and a Qdrant-backed implementation
//! over the single shared point collection.

pub mod filter;
pub mod point;
pub mod qdrant_sink;
pub mod sink;

pub use filter::{FilterCondition, ScalarValue, SinkFilter};
pub use point::PointRecord;
pub use qdrant_sink::QdrantSink;
pub use sink::{is_indexed_field, IndexKind, ScrollPage, SinkError, VectorSink, INDEXED_FIELDS};
