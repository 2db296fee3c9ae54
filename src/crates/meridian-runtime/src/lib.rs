//! Runtime composition for the meridian agent
//!
//! This crate wires the foundational services from `meridian-core` into a
//! running agent: SQLite persistence, the local graph memory provider, the
//! secrets pipeline, the hash-chained audit service, per-adapter observers,
//! outbound sinks, the state machine and processor loop, the resource
//! monitor, and the top-level [`runtime::Runtime`] that owns initialization
//! order and shutdown.

pub mod audit;
pub mod config;
pub mod correlations;
pub mod db;
pub mod filter;
pub mod identity;
pub mod memory;
pub mod observer;
pub mod processor;
pub mod rate_limit;
pub mod resource;
pub mod runtime;
pub mod secrets;
pub mod sinks;

use thiserror::Error;

/// Errors raised by the runtime composition layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Error from a core service or bus.
    #[error(transparent)]
    Core(#[from] meridian_core::CoreError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration could not be loaded or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity missing or corrupted. The runtime refuses to start.
    #[error("Identity error: {0}")]
    Identity(String),

    /// Audit subsystem failure.
    #[error("Audit error: {0}")]
    Audit(String),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Initialize tracing from the configured log level. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
