//! Thought model for database persistence

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use meridian_core::schemas::{ThoughtStatus, ThoughtType};

/// Structured processing context carried by a thought: filter hints,
/// wise-authority feedback provenance, and secret references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingContext {
    #[serde(default)]
    pub filter_priority: Option<String>,
    #[serde(default)]
    pub filter_reasoning: Option<String>,
    #[serde(default)]
    pub context_hints: Vec<String>,
    #[serde(default)]
    pub is_wa_feedback: bool,
    #[serde(default)]
    pub wa_author: Option<String>,
    #[serde(default)]
    pub secret_refs: Vec<String>,
    #[serde(default)]
    pub defer_reason: Option<String>,
}

/// A reasoning step bound to a task. Thoughts form a bounded tree per task;
/// parents are referenced by id, never by pointer.
///
/// # Timestamps
/// All timestamp fields are ISO8601 strings due to SQLite type limitations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThoughtRow {
    /// Unique thought identifier (`thought_` prefixed UUID string)
    pub id: String,

    /// Owning task; always references an existing task row
    pub source_task_id: String,

    /// Parent thought id, forming a tree
    pub parent_thought_id: Option<String>,

    /// observation, correction, scheduled, followup
    pub thought_type: String,

    /// pending, processing, completed, deferred, failed
    pub status: String,

    /// Depth of this thought in its chain; bounded by max_thought_depth
    pub round_number: i64,

    pub content: String,

    /// Scheduling priority inherited from the task
    pub priority: i64,

    /// JSON-encoded [`ProcessingContext`]
    pub processing_context: String,

    pub created_at: String,

    pub updated_at: String,
}

impl ThoughtRow {
    pub fn new(
        source_task_id: impl Into<String>,
        thought_type: ThoughtType,
        content: impl Into<String>,
        priority: i64,
        now_iso: &str,
    ) -> Self {
        Self {
            id: format!("thought_{}", uuid::Uuid::new_v4()),
            source_task_id: source_task_id.into(),
            parent_thought_id: None,
            thought_type: thought_type.as_str().to_string(),
            status: ThoughtStatus::Pending.as_str().to_string(),
            round_number: 0,
            content: content.into(),
            priority,
            processing_context: "{}".to_string(),
            created_at: now_iso.to_string(),
            updated_at: now_iso.to_string(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>, round_number: i64) -> Self {
        self.parent_thought_id = Some(parent_id.into());
        self.round_number = round_number;
        self
    }

    pub fn with_context(mut self, context: &ProcessingContext) -> Self {
        self.processing_context =
            serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());
        self
    }

    pub fn status(&self) -> Option<ThoughtStatus> {
        self.status.parse().ok()
    }

    pub fn thought_type(&self) -> Option<ThoughtType> {
        self.thought_type.parse().ok()
    }

    pub fn context(&self) -> ProcessingContext {
        serde_json::from_str(&self.processing_context).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thought_defaults() {
        let thought = ThoughtRow::new(
            "task_1",
            ThoughtType::Observation,
            "user said hi",
            1,
            "2026-01-01T00:00:00Z",
        );
        assert!(thought.id.starts_with("thought_"));
        assert_eq!(thought.status(), Some(ThoughtStatus::Pending));
        assert_eq!(thought.round_number, 0);
        assert!(thought.parent_thought_id.is_none());
    }

    #[test]
    fn test_context_round_trip() {
        let context = ProcessingContext {
            is_wa_feedback: true,
            wa_author: Some("wa_user".to_string()),
            ..Default::default()
        };
        let thought = ThoughtRow::new("task_1", ThoughtType::Correction, "fix", 3, "t")
            .with_parent("thought_0", 2)
            .with_context(&context);

        let parsed = thought.context();
        assert!(parsed.is_wa_feedback);
        assert_eq!(parsed.wa_author.as_deref(), Some("wa_user"));
        assert_eq!(thought.round_number, 2);
    }

    #[test]
    fn test_malformed_context_falls_back() {
        let mut thought =
            ThoughtRow::new("task_1", ThoughtType::Observation, "x", 0, "t");
        thought.processing_context = "not json".to_string();
        let parsed = thought.context();
        assert!(!parsed.is_wa_feedback);
    }
}
