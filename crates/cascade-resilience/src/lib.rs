//! Resilience services shared by the cascade sync engine: circuit breakers
//! guarding the three external collaborators, an append-only dead-letter
//! queue, and a passive metrics facade (spec §4.10).

pub mod circuit_breaker;
pub mod dlq;
pub mod metrics_facade;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dlq::{DeadLetterQueue, DlqEntry, DlqError, FailureStage};
