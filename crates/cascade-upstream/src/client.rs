//! The `UpstreamClient` trait: the one collaborator this crate does not
//! implement (spec §1, "the upstream RPC client" is out of scope). The host
//! binary supplies a concrete client (e.g. an XML-RPC/JSON-RPC adapter);
//! this crate only consumes the trait.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::Domain;

/// One upstream record, keyed by technical field name.
pub type Record = HashMap<String, JsonValue>;

/// Transport-level failure talking to the upstream database.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream refused to read one field on one model.
    #[error("field access denied: {model}.{field}: {message}")]
    FieldAccess { model: String, field: String, message: String },
    /// Anything else: connection refused, timeout, malformed response, etc.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// One page of records plus the upstream's reported total, for sizing.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Records in this page, in ascending-id order (spec §5, "Ordering guarantees").
    pub records: Vec<Record>,
    /// Total matching `domain`, independent of `offset`/`limit`.
    pub total: u64,
}

/// The upstream business-database RPC client this crate consumes (spec §4.2).
///
/// Implemented by a host-supplied adapter; this crate never constructs one.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Counts records matching `domain`, for sizing a run.
    async fn count(&self, model: &str, domain: &Domain) -> Result<u64, UpstreamError>;

    /// Reads one page of `fields` for records matching `domain`.
    async fn search_read(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Batch, UpstreamError>;
}
