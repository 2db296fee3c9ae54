//! Task repository for database operations

use sqlx::SqlitePool;

use meridian_core::schemas::TaskStatus;

use crate::db::models::TaskRow;

/// Task repository for managing task database operations
pub struct TaskRepository;

impl TaskRepository {
    /// Insert a new task row.
    pub async fn create(pool: &SqlitePool, task: &TaskRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tasks (id, origin_adapter, origin_channel, priority, status, \
             description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.origin_adapter)
        .bind(&task.origin_channel)
        .bind(task.priority)
        .bind(&task.status)
        .bind(&task.description)
        .bind(&task.created_at)
        .bind(&task.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Get a task by ID
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List tasks by status, newest first.
    pub async fn list_by_status(
        pool: &SqlitePool,
        status: TaskStatus,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = ? ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(pool)
        .await
    }

    /// Update task status
    pub async fn update_status(
        pool: &SqlitePool,
        id: &str,
        status: TaskStatus,
        now_iso: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_iso)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Count tasks in a status.
    pub async fn count_by_status(
        pool: &SqlitePool,
        status: TaskStatus,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_main_schema;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_main_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = pool().await;
        let task = TaskRow::new("cli", "cli", 1, "greet", "2026-01-01T00:00:00Z");
        TaskRepository::create(&pool, &task).await.unwrap();

        let loaded = TaskRepository::get_by_id(&pool, &task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.description, "greet");
        assert_eq!(loaded.status(), Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_update_status() {
        let pool = pool().await;
        let task = TaskRow::new("cli", "cli", 1, "greet", "2026-01-01T00:00:00Z");
        TaskRepository::create(&pool, &task).await.unwrap();

        TaskRepository::update_status(&pool, &task.id, TaskStatus::Active, "2026-01-01T00:01:00Z")
            .await
            .unwrap();
        let loaded = TaskRepository::get_by_id(&pool, &task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status(), Some(TaskStatus::Active));
        assert_eq!(loaded.updated_at, "2026-01-01T00:01:00Z");
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let pool = pool().await;
        for i in 0..3 {
            let task = TaskRow::new("cli", "cli", i, "t", "2026-01-01T00:00:00Z");
            TaskRepository::create(&pool, &task).await.unwrap();
        }
        assert_eq!(
            TaskRepository::count_by_status(&pool, TaskStatus::Pending)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            TaskRepository::count_by_status(&pool, TaskStatus::Completed)
                .await
                .unwrap(),
            0
        );
    }
}
