//! Essential configuration schema
//!
//! Mission-critical settings only: enough to bring up core services.
//! Unknown fields are rejected so a typo cannot silently disable a limit.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Core database paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Main SQLite database for tasks, thoughts, correlations, and the graph.
    pub main_db: PathBuf,
    /// Encrypted secrets storage database.
    pub secrets_db: PathBuf,
    /// Audit trail database with the signed hash chain.
    pub audit_db: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            main_db: PathBuf::from("data/meridian_engine.db"),
            secrets_db: PathBuf::from("data/secrets.db"),
            audit_db: PathBuf::from("data/meridian_audit.db"),
        }
    }
}

/// External service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceEndpointsConfig {
    pub llm_endpoint: String,
    pub llm_model: String,
    /// LLM request timeout in seconds.
    pub llm_timeout: u64,
    pub llm_max_retries: u32,
}

impl Default for ServiceEndpointsConfig {
    fn default() -> Self {
        Self {
            llm_endpoint: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_timeout: 30,
            llm_max_retries: 3,
        }
    }
}

/// Security and audit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Days to retain audit nodes in graph storage. The chain database is
    /// never pruned.
    pub audit_retention_days: u32,
    /// Environment variable holding the master encryption key for secrets.
    pub secrets_encryption_key_env: String,
    /// Directory containing audit signing keys.
    pub audit_key_path: PathBuf,
    /// Whether audit entries are hash-chained and signed.
    pub enable_signed_audit: bool,
    /// Maximum thought chain depth before auto-defer.
    pub max_thought_depth: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            audit_retention_days: 90,
            secrets_encryption_key_env: "MERIDIAN_MASTER_KEY".to_string(),
            audit_key_path: PathBuf::from("audit_keys"),
            enable_signed_audit: true,
            max_thought_depth: 7,
        }
    }
}

/// Operational limits and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationalLimitsConfig {
    pub max_active_tasks: u32,
    pub max_active_thoughts: u32,
    /// Delay between processing rounds in seconds.
    pub round_delay_seconds: f64,
    /// Reduced round delay when a mock LLM is wired in.
    pub mock_llm_round_delay: f64,
    pub dma_retry_limit: u32,
    pub dma_timeout_seconds: f64,
    pub conscience_retry_limit: u32,
}

impl Default for OperationalLimitsConfig {
    fn default() -> Self {
        Self {
            max_active_tasks: 10,
            max_active_thoughts: 50,
            round_delay_seconds: 5.0,
            mock_llm_round_delay: 0.1,
            dma_retry_limit: 3,
            dma_timeout_seconds: 30.0,
            conscience_retry_limit: 2,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub export_interval_seconds: u64,
    pub retention_hours: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            export_interval_seconds: 60,
            retention_hours: 24,
        }
    }
}

/// Workflow configuration for agent processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Rounds of processing before an automatic pause.
    pub max_rounds: u32,
    pub round_timeout_seconds: f64,
    /// Automatically defer work when hitting limits.
    pub enable_auto_defer: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            round_timeout_seconds: 300.0,
            enable_auto_defer: true,
        }
    }
}

/// Mission-critical configuration for bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EssentialConfig {
    pub database: DatabaseConfig,
    pub services: ServiceEndpointsConfig,
    pub security: SecurityConfig,
    pub limits: OperationalLimitsConfig,
    pub telemetry: TelemetryConfig,
    pub workflow: WorkflowConfig,

    pub log_level: String,
    pub debug_mode: bool,
    /// Directory containing identity templates, consulted only at first boot.
    pub template_directory: PathBuf,
    /// Template name used when no identity exists yet.
    pub default_template: String,
}

impl Default for EssentialConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            services: ServiceEndpointsConfig::default(),
            security: SecurityConfig::default(),
            limits: OperationalLimitsConfig::default(),
            telemetry: TelemetryConfig::default(),
            workflow: WorkflowConfig::default(),
            log_level: "INFO".to_string(),
            debug_mode: false,
            template_directory: PathBuf::from("templates"),
            default_template: "default".to_string(),
        }
    }
}

impl EssentialConfig {
    /// Load from a YAML file with `${ENV:default}` expansion.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        super::loader::load_yaml_config(path)
    }
}
