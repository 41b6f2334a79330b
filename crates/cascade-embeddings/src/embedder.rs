//! The embedding provider contract (spec §4.4).

use async_trait::async_trait;

/// Which side of a similarity search a text is on; providers that optimize
/// embeddings for retrieval (e.g. asymmetric models) use this to pick the
/// right encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Text being indexed for later retrieval.
    Document,
    /// Text a user is searching with.
    Query,
}

/// A provider of text embeddings. Implementations own their own batching,
/// rate limiting and retry policy; callers just hand over text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single piece of text.
    async fn embed(&self, text: &str, role: Role) -> Result<Vec<f32>, EmbedError>;

    /// Embeds many texts, batched internally per the provider's limits.
    /// Output order matches input order.
    async fn embed_batch(&self, texts: &[String], role: Role) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Output vector dimensionality this provider produces.
    fn dimensions(&self) -> usize;
}

/// Failure embedding text.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedder not configured: {0}")]
    Configuration(String),
    #[error("embedding request failed: {0}")]
    Transport(String),
    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}
