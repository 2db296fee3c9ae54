//! Bootstrap configuration
//!
//! [`EssentialConfig`] is loaded exactly once at bootstrap and never mutated
//! at runtime; post-bootstrap configuration lives in graph memory under the
//! config service.

mod essential;
mod loader;

pub use essential::{
    DatabaseConfig, EssentialConfig, OperationalLimitsConfig, SecurityConfig,
    ServiceEndpointsConfig, TelemetryConfig, WorkflowConfig,
};
pub use loader::{load_yaml_config, load_yaml_file};
