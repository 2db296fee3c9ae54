//! SQLite-backed correlation store for the bus layer

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use meridian_core::buses::CorrelationStore;
use meridian_core::error::{CoreError, Result};
use meridian_core::schemas::Correlation;
use meridian_core::time::TimeService;

use crate::db::models::CorrelationRow;
use crate::db::repositories::CorrelationRepository;

/// Persists bus correlations into the main database.
pub struct SqlCorrelationStore {
    pool: SqlitePool,
    time: Arc<dyn TimeService>,
}

impl SqlCorrelationStore {
    pub fn new(pool: SqlitePool, time: Arc<dyn TimeService>) -> Self {
        Self { pool, time }
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Transient(format!("correlation store: {e}"))
}

#[async_trait]
impl CorrelationStore for SqlCorrelationStore {
    async fn begin(&self, correlation: &Correlation) -> Result<()> {
        let row = CorrelationRow::from_correlation(correlation);
        CorrelationRepository::insert(&self.pool, &row)
            .await
            .map_err(db_err)
    }

    async fn complete(&self, correlation_id: &str, response: Value) -> Result<()> {
        CorrelationRepository::complete(
            &self.pool,
            correlation_id,
            &response.to_string(),
            &self.time.now_iso(),
        )
        .await
        .map_err(db_err)
    }

    async fn fail(&self, correlation_id: &str, error: &str) -> Result<()> {
        CorrelationRepository::fail(&self.pool, correlation_id, error, &self.time.now_iso())
            .await
            .map_err(db_err)
    }
}
