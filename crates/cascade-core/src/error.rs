//! Error types shared across the cascade sync engine.
//!
//! Mirrors the ten typed error kinds in spec §7. Each downstream crate may
//! add its own narrower `thiserror` enum for errors that never cross a
//! component boundary, but anything a caller of this workspace needs to
//! branch on lives here.

use std::time::Duration;
use thiserror::Error;

/// Which external collaborator a circuit breaker is guarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// The upstream business-database RPC client.
    Extractor,
    /// The embedding provider.
    Embedder,
    /// The vector store.
    VectorSink,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Service::Extractor => "extractor",
            Service::Embedder => "embedder",
            Service::VectorSink => "vector_sink",
        };
        f.write_str(s)
    }
}

/// Reason an upstream field read was refused (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionReason {
    /// The upstream access-control layer refused the field.
    SecurityRestriction,
    /// The field is computed and its computation raised an error.
    ComputeError,
    /// A server-side error specific to the upstream implementation.
    UpstreamError,
    /// The field-access error did not match a known pattern.
    Unknown,
}

/// Crate-wide error type. Names and conditions follow spec §7's table.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A circuit breaker guarding `service` is open; the caller must not retry here.
    #[error("circuit open for {service}")]
    CircuitOpen {
        /// The guarded collaborator.
        service: Service,
    },

    /// The upstream refused to read `field` on `model`.
    #[error("field {model}.{field} restricted: {reason:?}")]
    FieldRestricted {
        /// Owning model's technical name.
        model: String,
        /// Restricted field's technical name.
        field: String,
        /// Why the field was restricted.
        reason: RestrictionReason,
    },

    /// `model` is absent from the loaded schema registry.
    #[error("model {model} not found in schema registry{}", suggestions_suffix(.suggestions))]
    SchemaMissing {
        /// The model name that was requested.
        model: String,
        /// Similarly-named models, for the error message.
        suggestions: Vec<String>,
    },

    /// No schema has been loaded at all.
    #[error("no schema loaded; run `sync schema` first")]
    SchemaEmpty,

    /// A filter referenced a field that is neither a system field, indexed, nor dot-notation.
    #[error("filter references unindexed field(s): {}", .fields.join(", "))]
    UnindexedFilter {
        /// The offending field names, in request order.
        fields: Vec<String>,
    },

    /// A sync for `model` is already in progress on this process.
    #[error("sync for {model} already in progress ({elapsed:?} elapsed)")]
    LockHeld {
        /// The model whose lock is held.
        model: String,
        /// How long the in-progress sync has been running.
        elapsed: Duration,
        /// Best-effort progress description.
        progress: String,
    },

    /// The upstream transport failed (connection, timeout, protocol).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The vector store rejected a call.
    #[error("vector sink error: {0}")]
    SinkError(String),

    /// One or more request arguments failed validation; always returned in full.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The ambient cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Anything else, wrapped for context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn suggestions_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

/// Result alias used throughout the cascade sync engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_missing_without_suggestions() {
        let err = Error::SchemaMissing {
            model: "lead".to_string(),
            suggestions: vec![],
        };
        assert_eq!(err.to_string(), "model lead not found in schema registry");
    }

    #[test]
    fn schema_missing_with_suggestions() {
        let err = Error::SchemaMissing {
            model: "laed".to_string(),
            suggestions: vec!["lead".to_string()],
        };
        assert!(err.to_string().contains("did you mean: lead?"));
    }

    #[test]
    fn unindexed_filter_lists_all_offenders() {
        let err = Error::UnindexedFilter {
            fields: vec!["comment".to_string(), "notes".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "filter references unindexed field(s): comment, notes"
        );
    }

    #[test]
    fn circuit_open_names_the_service() {
        let err = Error::CircuitOpen { service: Service::Embedder };
        assert_eq!(err.to_string(), "circuit open for embedder");
    }
}
