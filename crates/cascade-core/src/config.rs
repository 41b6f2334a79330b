//! Process-wide configuration assembled from environment variables.
//!
//! Mirrors spec §6 ("Environment"): endpoint/credential variables are
//! required, the cache-tuning variables have defaults. The CLI binary is
//! the only caller expected to construct this from the real environment;
//! everything else should receive an already-built [`Config`] by
//! constructor injection (spec §9, "no process-global state").

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default TTL for the graph-context LRU cache, in milliseconds.
pub const DEFAULT_GRAPH_CACHE_TTL_MS: u64 = 300_000;
/// Default max entries for the general-purpose cache.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 500;
/// Default TTL for the general-purpose cache, in milliseconds.
pub const DEFAULT_CACHE_TTL_MS: u64 = 1_800_000;

/// Failure building a [`Config`] from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable {0}")]
    MissingVar(String),
    /// A numeric environment variable could not be parsed.
    #[error("environment variable {var} has invalid numeric value {value:?}")]
    InvalidNumber {
        /// The variable's name.
        var: String,
        /// The value that failed to parse.
        value: String,
    },
}

/// Vector store connection settings (`VECTOR_ENDPOINT`, `VECTOR_API_KEY`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorStoreConfig {
    /// gRPC/HTTP endpoint of the vector store.
    pub endpoint: String,
    /// API key, when the store requires one.
    pub api_key: Option<String>,
}

/// Embedding provider settings (`EMBEDDER_API_KEY`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderConfig {
    /// API key for the remote embedding provider.
    pub api_key: String,
}

/// Upstream business-database connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Base URL of the upstream RPC endpoint.
    pub url: String,
    /// Database/tenant name.
    pub db: String,
    /// Service account username.
    pub user: String,
    /// Service account password.
    pub password: String,
}

/// Remote export storage settings, present only when export is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStorageConfig {
    /// Object-storage endpoint.
    pub endpoint: String,
    /// Opaque credential string (access key, SAS token, etc.).
    pub credentials: Option<String>,
}

/// Tuning for the caches described in spec §9 ("LRU cache for graph context").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for cached graph-context lookups.
    pub graph_cache_ttl: Duration,
    /// Max entries retained by the general-purpose cache.
    pub max_entries: usize,
    /// TTL for the general-purpose cache.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            graph_cache_ttl: Duration::from_millis(DEFAULT_GRAPH_CACHE_TTL_MS),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
        }
    }
}

/// Fully assembled process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Vector store connection settings.
    pub vector_store: VectorStoreConfig,
    /// Embedding provider settings.
    pub embedder: EmbedderConfig,
    /// Upstream connection settings.
    pub upstream: UpstreamConfig,
    /// Remote export settings, if configured.
    pub export_storage: Option<ExportStorageConfig>,
    /// Cache tuning.
    pub cache: CacheConfig,
}

impl Config {
    /// Builds a [`Config`] from the process environment, applying the
    /// documented defaults for unset cache-tuning variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] when a required variable is
    /// absent, or [`ConfigError::InvalidNumber`] when a numeric variable
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vector_store = VectorStoreConfig {
            endpoint: required("VECTOR_ENDPOINT")?,
            api_key: optional("VECTOR_API_KEY"),
        };
        let embedder = EmbedderConfig {
            api_key: required("EMBEDDER_API_KEY")?,
        };
        let upstream = UpstreamConfig {
            url: required("UPSTREAM_URL")?,
            db: required("UPSTREAM_DB")?,
            user: required("UPSTREAM_USER")?,
            password: required("UPSTREAM_PASSWORD")?,
        };
        let export_storage = optional("EXPORT_STORAGE_ENDPOINT").map(|endpoint| ExportStorageConfig {
            endpoint,
            credentials: optional("EXPORT_STORAGE_CREDENTIALS"),
        });
        let cache = CacheConfig {
            graph_cache_ttl: Duration::from_millis(numeric_or("GRAPH_CACHE_TTL_MS", DEFAULT_GRAPH_CACHE_TTL_MS)?),
            max_entries: numeric_or("CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES as u64)? as usize,
            ttl: Duration::from_millis(numeric_or("CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS)?),
        };

        Ok(Self { vector_store, embedder, upstream, export_storage, cache })
    }

    /// Overrides the cache configuration, e.g. for tests or CLI flag overrides.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

fn required(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar(var.to_string()))
}

fn optional(var: &str) -> Option<String> {
    env::var(var).ok()
}

fn numeric_or(var: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidNumber { var: var.to_string(), value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "VECTOR_ENDPOINT",
            "VECTOR_API_KEY",
            "EMBEDDER_API_KEY",
            "UPSTREAM_URL",
            "UPSTREAM_DB",
            "UPSTREAM_USER",
            "UPSTREAM_PASSWORD",
            "EXPORT_STORAGE_ENDPOINT",
            "EXPORT_STORAGE_CREDENTIALS",
            "GRAPH_CACHE_TTL_MS",
            "CACHE_MAX_ENTRIES",
            "CACHE_TTL_MS",
        ] {
            env::remove_var(var);
        }
    }

    fn set_required() {
        env::set_var("VECTOR_ENDPOINT", "http://localhost:6334");
        env::set_var("EMBEDDER_API_KEY", "embed-key");
        env::set_var("UPSTREAM_URL", "http://localhost:8069");
        env::set_var("UPSTREAM_DB", "prod");
        env::set_var("UPSTREAM_USER", "svc");
        env::set_var("UPSTREAM_PASSWORD", "secret");
    }

    #[test]
    fn from_env_applies_cache_defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        set_required();

        let config = Config::from_env().unwrap();
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.export_storage, None);
        clear_all();
    }

    #[test]
    fn from_env_fails_on_missing_required_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();

        let err = Config::from_env().unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("VECTOR_ENDPOINT".to_string()));
        clear_all();
    }

    #[test]
    fn from_env_rejects_non_numeric_cache_ttl() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        set_required();
        env::set_var("CACHE_TTL_MS", "not-a-number");

        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber { var: "CACHE_TTL_MS".to_string(), value: "not-a-number".to_string() }
        );
        clear_all();
    }
}
