//! Thought repository for database operations

use sqlx::SqlitePool;

use meridian_core::schemas::{ThoughtStatus, ThoughtType};

use crate::db::models::ThoughtRow;

/// Thought repository for managing thought database operations
pub struct ThoughtRepository;

impl ThoughtRepository {
    /// Insert a new thought row.
    pub async fn create(pool: &SqlitePool, thought: &ThoughtRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO thoughts (id, source_task_id, parent_thought_id, thought_type, \
             status, round_number, content, priority, processing_context, created_at, \
             updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&thought.id)
        .bind(&thought.source_task_id)
        .bind(&thought.parent_thought_id)
        .bind(&thought.thought_type)
        .bind(&thought.status)
        .bind(thought.round_number)
        .bind(&thought.content)
        .bind(thought.priority)
        .bind(&thought.processing_context)
        .bind(&thought.created_at)
        .bind(&thought.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_id(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<ThoughtRow>, sqlx::Error> {
        sqlx::query_as::<_, ThoughtRow>("SELECT * FROM thoughts WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Pending thoughts ordered for a processing round:
    /// priority descending, then oldest first.
    pub async fn pending_batch(
        pool: &SqlitePool,
        limit: u32,
    ) -> Result<Vec<ThoughtRow>, sqlx::Error> {
        sqlx::query_as::<_, ThoughtRow>(
            "SELECT * FROM thoughts WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: &str,
        status: ThoughtStatus,
        now_iso: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE thoughts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_iso)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Update status and merge a defer reason into the processing context.
    pub async fn mark_deferred(
        pool: &SqlitePool,
        id: &str,
        reason: &str,
        now_iso: &str,
    ) -> Result<(), sqlx::Error> {
        if let Some(thought) = Self::get_by_id(pool, id).await? {
            let mut context = thought.context();
            context.defer_reason = Some(reason.to_string());
            let encoded =
                serde_json::to_string(&context).unwrap_or_else(|_| "{}".to_string());
            sqlx::query(
                "UPDATE thoughts SET status = 'deferred', processing_context = ?, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(encoded)
            .bind(now_iso)
            .bind(id)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// All thoughts belonging to a task.
    pub async fn for_task(
        pool: &SqlitePool,
        task_id: &str,
    ) -> Result<Vec<ThoughtRow>, sqlx::Error> {
        sqlx::query_as::<_, ThoughtRow>(
            "SELECT * FROM thoughts WHERE source_task_id = ? ORDER BY created_at ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    /// Thoughts still pending or processing.
    pub async fn count_active(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM thoughts WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Existing correction thought for a deferred parent, if any. Used to
    /// deduplicate wise-authority feedback.
    pub async fn find_correction_for_parent(
        pool: &SqlitePool,
        parent_thought_id: &str,
    ) -> Result<Option<ThoughtRow>, sqlx::Error> {
        sqlx::query_as::<_, ThoughtRow>(
            "SELECT * FROM thoughts WHERE parent_thought_id = ? AND thought_type = ? LIMIT 1",
        )
        .bind(parent_thought_id)
        .bind(ThoughtType::Correction.as_str())
        .fetch_optional(pool)
        .await
    }
}
