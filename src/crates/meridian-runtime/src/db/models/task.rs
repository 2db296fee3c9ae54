//! Task model for database persistence

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use meridian_core::schemas::TaskStatus;

/// A unit of agent work as persisted in the main database.
///
/// # Timestamps
/// All timestamp fields are ISO8601 strings due to SQLite type limitations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    /// Unique task identifier (`task_` prefixed UUID string)
    pub id: String,

    /// Adapter kind the task originated from (e.g., "cli", "chat")
    pub origin_adapter: String,

    /// Channel within the adapter the task originated from
    pub origin_channel: String,

    /// Scheduling priority; higher is processed first
    pub priority: i64,

    /// Current status: pending, active, deferred, completed, failed
    pub status: String,

    /// Human-readable description of the work
    pub description: String,

    pub created_at: String,

    pub updated_at: String,
}

impl TaskRow {
    /// Create a new pending task.
    pub fn new(
        origin_adapter: impl Into<String>,
        origin_channel: impl Into<String>,
        priority: i64,
        description: impl Into<String>,
        now_iso: &str,
    ) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            origin_adapter: origin_adapter.into(),
            origin_channel: origin_channel.into(),
            priority,
            status: TaskStatus::Pending.as_str().to_string(),
            description: description.into(),
            created_at: now_iso.to_string(),
            updated_at: now_iso.to_string(),
        }
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.status.parse().ok()
    }
}
