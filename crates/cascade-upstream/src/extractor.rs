//! Pages records from the upstream and transparently recovers from
//! field-level access errors (spec §4.2).
//!
//! The retry loop is modeled as an explicit state machine over a
//! `RestrictedFields` parameter threaded through the call, not a closure
//! capturing mutable state (spec §9, "Retry-on-field-error with
//! side-channel callback").

use std::sync::Arc;

use cascade_core::error::RestrictionReason;
use cascade_core::transformer::RestrictedFields;

use crate::classify::classify;
use crate::client::{Batch, UpstreamClient, UpstreamError};
use crate::domain::Domain;

/// Default cap on field-error retries within one `resilient_search_read` call.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Tuning for [`Extractor::resilient_search_read`].
#[derive(Debug, Clone)]
pub struct ResilientOptions {
    /// Max field-error retries before the call fails (spec §4.2, default 5).
    pub max_retries: u32,
}

impl Default for ResilientOptions {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES }
    }
}

/// One field dropped from the projection during a `resilient_search_read` call.
#[derive(Debug, Clone, PartialEq)]
pub struct NewlyRestrictedField {
    /// The field's technical name.
    pub field: String,
    /// Why the upstream refused it.
    pub reason: RestrictionReason,
}

/// Failure of a resilient extraction: the retry loop was exhausted or a
/// non-field-access transport error occurred.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// A transport-level error bubbled straight through (spec §4.2,
    /// "A transport error bubbles out").
    #[error(transparent)]
    Transport(#[from] UpstreamError),
    /// More than `max_retries` distinct fields were rejected in one call.
    #[error("exceeded max_retries ({max_retries}) recovering from field-access errors on {model}")]
    RetriesExhausted { model: String, max_retries: u32 },
}

/// Pages records from the upstream, applying domain filters and (on the
/// resilient path) recovering from field-access errors.
pub struct Extractor {
    client: Arc<dyn UpstreamClient>,
}

impl Extractor {
    /// Wraps a host-supplied [`UpstreamClient`].
    #[must_use]
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    /// Counts records matching `domain`, for sizing a run (spec §4.2).
    pub async fn count(&self, model: &str, domain: &Domain) -> Result<u64, UpstreamError> {
        self.client.count(model, domain).await
    }

    /// One page of `fields` for `model` matching `domain`, with no retry
    /// logic: a field-access error bubbles straight out (spec §4.2's plain
    /// `SearchRead`).
    pub async fn search_read(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Batch, UpstreamError> {
        self.client.search_read(model, domain, fields, offset, limit).await
    }

    /// The production read path: on a field-access error, identifies the
    /// offending field, classifies the reason, drops it from the
    /// projection, and retries — up to `opts.max_retries` distinct
    /// rejections — reporting each newly-discovered restriction through
    /// `on_restriction` and folding it into the returned, run-scoped
    /// `restricted` set (spec §4.2's `ResilientSearchRead`).
    pub async fn resilient_search_read(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        restricted: &mut RestrictedFields,
        opts: &ResilientOptions,
        mut on_restriction: Option<&mut dyn FnMut(&NewlyRestrictedField)>,
        offset: u64,
        limit: u64,
    ) -> Result<(Batch, u32), ExtractError> {
        let mut projection: Vec<String> =
            fields.iter().filter(|f| !restricted.contains(f)).cloned().collect();
        let mut retries = 0u32;

        loop {
            match self.client.search_read(model, domain, &projection, offset, limit).await {
                Ok(batch) => return Ok((batch, retries)),
                Err(UpstreamError::FieldAccess { field, message, .. }) => {
                    if retries >= opts.max_retries {
                        return Err(ExtractError::RetriesExhausted {
                            model: model.to_string(),
                            max_retries: opts.max_retries,
                        });
                    }
                    let reason = classify(&message);
                    restricted.insert(field.clone(), reason);
                    projection.retain(|f| f != &field);
                    let newly = NewlyRestrictedField { field, reason };
                    if let Some(cb) = on_restriction.as_deref_mut() {
                        cb(&newly);
                    }
                    tracing::warn!(model, field = %newly.field, reason = ?newly.reason, "field restricted, retrying without it");
                    retries += 1;
                }
                Err(other @ UpstreamError::Transport(_)) => return Err(other.into()),
            }
        }
    }
}
