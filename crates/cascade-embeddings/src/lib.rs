//! Embedding provider contract (spec §4.4) plus a concrete HTTP-based
//! adapter. Batching, rate limiting and retry discipline live entirely on
//! the provider side of the trait; callers just pass text and a role.

pub mod embedder;
pub mod http;
pub mod retry;

pub use embedder::{EmbedError, Embedder, Role};
pub use http::HttpEmbedder;
pub use retry::{with_retry, RetryPolicy};
