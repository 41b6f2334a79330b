//! Upstream extraction: paged reads against the business database, with
//! incremental watermarks and resilient field-access-error recovery
//! (spec §4.2). The upstream RPC client itself is a collaborator supplied
//! by the host; this crate defines the trait and the retry discipline
//! around it.

pub mod classify;
pub mod client;
pub mod domain;
pub mod extractor;
pub mod watermark;

pub use client::{Batch, Record, UpstreamClient, UpstreamError};
pub use domain::{DateWindow, Domain};
pub use extractor::{ExtractError, Extractor, NewlyRestrictedField, ResilientOptions, DEFAULT_MAX_RETRIES};
pub use watermark::{SyncMetadata, WatermarkAccumulator};
