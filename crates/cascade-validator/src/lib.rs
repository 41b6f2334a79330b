//! FK validation and reconciliation: closure checks, orphan detection,
//! bidirectional consistency, and bounded healing (spec §4.8).

pub mod auto_sync;
pub mod discovery;
pub mod report;
pub mod validator;

pub use auto_sync::AutoSyncer;
pub use discovery::{discover_models, observe_fk_fields, FkFieldObservation, FkReference};
pub use report::{Discrepancy, FieldReport, ModelReport, ValidationReport};
pub use validator::{FkValidator, RunOptions, ValidatorError, DEFAULT_ORPHAN_LIMIT};
