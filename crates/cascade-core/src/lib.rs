//! Shared vocabulary for the cascade sync engine: point ids, the schema
//! registry, payload shapes, the record transformer, narrative patterns and
//! typed errors. Every other crate in the workspace depends on this one;
//! this one depends on nothing in the workspace.

pub mod config;
pub mod error;
pub mod ids;
pub mod pattern;
pub mod payload;
pub mod schema;
pub mod transformer;

pub use config::{CacheConfig, Config, ConfigError};
pub use error::{Error, Result, RestrictionReason, Service};
pub use ids::{Namespace, PointId, RelationKind};
pub use pattern::{Formatter, Pattern, UnknownFormatterWarning};
pub use payload::{
    CardinalityClass, DataPointPayload, GraphEdgePayload, IntegrityTrend, OrphanSample, Point, PayloadValue,
    SchemaPointPayload, ValidationHistoryEntry,
};
pub use schema::{Category, Field, FieldType, FkField, Model, SchemaRegistry, SchemaSource};
pub use transformer::{transform, RestrictedFields, TransformOutput};
