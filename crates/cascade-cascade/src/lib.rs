//! Cascade orchestration (spec §4.6): recursive FK-driven sync, a
//! worker pool for dependency expansion, per-model sync locks, and the
//! result shape the CLI and `validate fk --auto-sync` both consume.

pub mod accumulator;
pub mod config;
pub mod coordinator;
pub mod lock;
pub mod pipeline;
pub mod queue;
pub mod result;

pub use accumulator::{FkAccumulator, FkFieldAccumulator};
pub use config::{CascadeConfig, DEFAULT_BATCH_SIZE, DEFAULT_DEPTH_CAP, DEFAULT_PARALLEL_TARGETS};
pub use coordinator::{CascadeRequest, Coordinator};
pub use lock::{LockContention, SyncLockGuard, SyncLockRegistry};
pub use pipeline::{run_model_sync, ModelSyncPlan, PipelineContext, PipelineOutput};
pub use queue::WorkQueue;
pub use result::{CascadeResult, ModelSyncResult, SyncOutcome, SyncType};
