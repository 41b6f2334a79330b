//! Host-supplied collaborators the rest of the workspace only consumes as
//! traits (spec §1): the upstream RPC client and the schema loader.

pub mod http_upstream;
pub mod pattern_source;
pub mod schema_source;

pub use http_upstream::HttpUpstreamClient;
pub use schema_source::{JsonFileSchemaSource, SchemaLoadError};
