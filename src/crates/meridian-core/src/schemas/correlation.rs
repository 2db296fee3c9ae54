//! Service-call correlation schema
//!
//! Every bus call writes one correlation at start and resolves it at the
//! end, so a trace of inputs and outputs exists for each provider dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStatus {
    Pending,
    Completed,
    Failed,
}

impl CorrelationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationStatus::Pending => "pending",
            CorrelationStatus::Completed => "completed",
            CorrelationStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CorrelationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CorrelationStatus::Pending),
            "completed" => Ok(CorrelationStatus::Completed),
            "failed" => Ok(CorrelationStatus::Failed),
            other => Err(format!("unknown correlation status: {other}")),
        }
    }
}

impl std::fmt::Display for CorrelationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace of one service call from selection to resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub correlation_id: String,
    pub service_kind: String,
    pub handler_name: String,
    pub action_type: String,
    pub request_data: Value,
    #[serde(default)]
    pub response_data: Option<Value>,
    pub status: CorrelationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Correlation {
    pub fn begin(
        service_kind: impl Into<String>,
        handler_name: impl Into<String>,
        action_type: impl Into<String>,
        request_data: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: format!("corr_{}", uuid::Uuid::new_v4()),
            service_kind: service_kind.into(),
            handler_name: handler_name.into(),
            action_type: action_type.into(),
            request_data,
            response_data: None,
            status: CorrelationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_pending() {
        let corr = Correlation::begin(
            "tool",
            "agent_processor",
            "execute_tool",
            serde_json::json!({"name": "echo"}),
            Utc::now(),
        );
        assert_eq!(corr.status, CorrelationStatus::Pending);
        assert!(corr.correlation_id.starts_with("corr_"));
        assert!(corr.response_data.is_none());
    }
}
