//! Correlation repository for database operations

use sqlx::SqlitePool;

use crate::db::models::CorrelationRow;

/// Correlation repository for service-call traces
pub struct CorrelationRepository;

impl CorrelationRepository {
    pub async fn insert(pool: &SqlitePool, row: &CorrelationRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO correlations (correlation_id, service_kind, handler_name, \
             action_type, request_data, response_data, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.correlation_id)
        .bind(&row.service_kind)
        .bind(&row.handler_name)
        .bind(&row.action_type)
        .bind(&row.request_data)
        .bind(&row.response_data)
        .bind(&row.status)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn complete(
        pool: &SqlitePool,
        correlation_id: &str,
        response_json: &str,
        now_iso: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE correlations SET status = 'completed', response_data = ?, \
             updated_at = ? WHERE correlation_id = ?",
        )
        .bind(response_json)
        .bind(now_iso)
        .bind(correlation_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn fail(
        pool: &SqlitePool,
        correlation_id: &str,
        error: &str,
        now_iso: &str,
    ) -> Result<(), sqlx::Error> {
        let response = serde_json::json!({ "error": error }).to_string();
        sqlx::query(
            "UPDATE correlations SET status = 'failed', response_data = ?, \
             updated_at = ? WHERE correlation_id = ?",
        )
        .bind(response)
        .bind(now_iso)
        .bind(correlation_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_id(
        pool: &SqlitePool,
        correlation_id: &str,
    ) -> Result<Option<CorrelationRow>, sqlx::Error> {
        sqlx::query_as::<_, CorrelationRow>(
            "SELECT * FROM correlations WHERE correlation_id = ?",
        )
        .bind(correlation_id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_main_schema;
    use chrono::Utc;
    use meridian_core::schemas::{Correlation, CorrelationStatus};

    #[tokio::test]
    async fn test_insert_complete_cycle() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_main_schema(&pool).await.unwrap();

        let correlation = Correlation::begin(
            "tool",
            "processor",
            "execute_tool",
            serde_json::json!({}),
            Utc::now(),
        );
        let row = CorrelationRow::from_correlation(&correlation);
        CorrelationRepository::insert(&pool, &row).await.unwrap();

        CorrelationRepository::complete(
            &pool,
            &correlation.correlation_id,
            "{\"ok\":true}",
            "t2",
        )
        .await
        .unwrap();

        let loaded = CorrelationRepository::get_by_id(&pool, &correlation.correlation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status(), Some(CorrelationStatus::Completed));
        assert_eq!(loaded.response_data.as_deref(), Some("{\"ok\":true}"));
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_main_schema(&pool).await.unwrap();

        let correlation = Correlation::begin(
            "llm",
            "processor",
            "complete",
            serde_json::json!({}),
            Utc::now(),
        );
        let row = CorrelationRow::from_correlation(&correlation);
        CorrelationRepository::insert(&pool, &row).await.unwrap();
        CorrelationRepository::fail(&pool, &correlation.correlation_id, "timeout", "t2")
            .await
            .unwrap();

        let loaded = CorrelationRepository::get_by_id(&pool, &correlation.correlation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status(), Some(CorrelationStatus::Failed));
        assert!(loaded.response_data.unwrap().contains("timeout"));
    }
}
