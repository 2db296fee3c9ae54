//! Tool execution result schema

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub correlation_id: String,
}

impl ToolResult {
    pub fn success(
        tool_name: impl Into<String>,
        result: Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result,
            error: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        error: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            correlation_id: correlation_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let ok = ToolResult::success("echo", serde_json::json!({"out": "hi"}), "corr_1");
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ToolResult::failure("echo", "not found", "corr_2");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("not found"));
    }
}
