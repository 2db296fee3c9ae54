//! Correlation model for database persistence

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use meridian_core::schemas::{Correlation, CorrelationStatus};

/// One service call trace as persisted in the main database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrelationRow {
    pub correlation_id: String,
    pub service_kind: String,
    pub handler_name: String,
    pub action_type: String,
    /// JSON-encoded request payload
    pub request_data: String,
    /// JSON-encoded response payload, set on completion
    pub response_data: Option<String>,
    /// pending, completed, failed
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CorrelationRow {
    pub fn from_correlation(correlation: &Correlation) -> Self {
        Self {
            correlation_id: correlation.correlation_id.clone(),
            service_kind: correlation.service_kind.clone(),
            handler_name: correlation.handler_name.clone(),
            action_type: correlation.action_type.clone(),
            request_data: correlation.request_data.to_string(),
            response_data: correlation
                .response_data
                .as_ref()
                .map(|v| v.to_string()),
            status: correlation.status.as_str().to_string(),
            created_at: correlation.created_at.to_rfc3339(),
            updated_at: correlation.updated_at.to_rfc3339(),
        }
    }

    pub fn status(&self) -> Option<CorrelationStatus> {
        self.status.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_from_correlation() {
        let correlation = Correlation::begin(
            "memory",
            "audit_service",
            "memorize",
            serde_json::json!({"node_id": "n1"}),
            Utc::now(),
        );
        let row = CorrelationRow::from_correlation(&correlation);
        assert_eq!(row.status(), Some(CorrelationStatus::Pending));
        assert_eq!(row.service_kind, "memory");
        assert!(row.response_data.is_none());
    }
}
