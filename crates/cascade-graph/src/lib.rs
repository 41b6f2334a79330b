//! Graph edge store: CRUD, BFS traversal, semantic search over edge
//! descriptions, and structural role derivation (spec §4.7).

pub mod role;
pub mod store;

pub use role::ModelRole;
pub use store::{GraphError, GraphStats, GraphStore, TraversalResult, UpsertInput};
