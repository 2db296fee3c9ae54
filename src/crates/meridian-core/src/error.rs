//! Error types shared across the meridian runtime
//!
//! Every externally visible failure falls into one of a small set of
//! classes, because the bus layer routes on them: validation and permanent
//! errors never trigger provider fallback, transient errors and timeouts do,
//! and unavailability is a terminal answer for a single call but not for the
//! caller.

use thiserror::Error;

/// Convenience result type using [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy for service calls and core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input violated the schema for the operation. Reported to the caller,
    /// never retried, never counted against a circuit breaker.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No registered provider matched the lookup.
    #[error("No provider available for service kind '{kind}'")]
    Unavailable { kind: String },

    /// Transient provider failure (connection error, 5xx-equivalent).
    /// Counts against the circuit breaker and triggers fallback.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Permanent provider failure (4xx-equivalent, auth denial). No other
    /// provider can succeed with the same inputs, so no fallback.
    #[error("Permanent provider error: {0}")]
    Permanent(String),

    /// Operation exceeded its deadline. Classified as a provider failure.
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Cryptographic or chain integrity failure. Never silently corrected.
    #[error("Integrity failure: {0}")]
    Integrity(String),

    /// A resource budget refused admission.
    #[error("Resource '{resource}' exhausted: {detail}")]
    ResourceExhausted { resource: String, detail: String },

    /// Caller exceeded its request budget.
    #[error("Rate limited, retry after {retry_after_secs:.1}s")]
    RateLimited { retry_after_secs: f64 },

    /// Unrecoverable startup failure; the runtime refuses to start.
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the bus should try the next eligible provider after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Timeout { .. })
    }

    /// Whether this error should increment the provider's circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            CoreError::Transient(_) | CoreError::Timeout { .. } | CoreError::Io(_)
        )
    }

    /// Create a timeout error for an operation.
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        CoreError::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create an unavailable error for a service kind.
    pub fn unavailable(kind: impl Into<String>) -> Self {
        CoreError::Unavailable { kind: kind.into() }
    }
}
