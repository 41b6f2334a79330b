//! One module per CLI subcommand (spec §6).

pub mod search;
pub mod sync_pipeline;
pub mod sync_schema;
pub mod validate_fk;
