//! Local graph memory provider
//!
//! SQLite-backed implementation of the `MemoryService` protocol, registered
//! on the memory bus. Identity-scope writes demand an approver: a memorize
//! into `GraphScope::Identity` with an empty `updated_by` is denied rather
//! than erred, since refusing is a policy outcome, not a failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;

use meridian_core::error::{CoreError, Result};
use meridian_core::protocols::{MemoryService, RuntimeService};
use meridian_core::schemas::{
    GraphNode, GraphScope, MemoryOpResult, MemoryQuery, NodeType, SearchFilter, TimeSeriesPoint,
};
use meridian_core::time::TimeService;

use crate::db::models::GraphNodeRow;
use crate::db::repositories::GraphRepository;

const DEFAULT_SEARCH_LIMIT: i64 = 200;

/// Graph memory provider over the main database.
pub struct LocalGraphMemory {
    pool: SqlitePool,
    time: Arc<dyn TimeService>,
}

impl LocalGraphMemory {
    pub fn new(pool: SqlitePool, time: Arc<dyn TimeService>) -> Self {
        Self { pool, time }
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Transient(format!("graph store: {e}"))
}

#[async_trait]
impl RuntimeService for LocalGraphMemory {
    fn capabilities(&self) -> Vec<String> {
        vec![
            "memorize".to_string(),
            "recall".to_string(),
            "forget".to_string(),
            "search".to_string(),
            "recall_timeseries".to_string(),
        ]
    }
}

#[async_trait]
impl MemoryService for LocalGraphMemory {
    async fn memorize(&self, node: GraphNode) -> Result<MemoryOpResult> {
        if node.scope == GraphScope::Identity && node.updated_by.is_empty() {
            return Ok(MemoryOpResult::denied(
                "identity-scope writes require an approver",
            ));
        }

        let existing = GraphRepository::get(&self.pool, &node.id, node.scope)
            .await
            .map_err(db_err)?;

        let mut row = GraphNodeRow::from_node(&node);
        if let Some(existing) = existing {
            row.version = existing.version + 1;
        }
        row.updated_at = self.time.now_iso();

        GraphRepository::upsert(&self.pool, &row).await.map_err(db_err)?;
        Ok(MemoryOpResult::ok())
    }

    async fn recall(&self, query: MemoryQuery) -> Result<Vec<GraphNode>> {
        let row = GraphRepository::get(&self.pool, &query.node_id, query.scope)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let node = row
                    .into_node()
                    .map_err(|e| CoreError::Integrity(format!("corrupt graph node: {e}")))?;
                Ok(vec![node])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn forget(&self, node_id: &str, scope: GraphScope) -> Result<MemoryOpResult> {
        let removed = GraphRepository::delete(&self.pool, node_id, scope)
            .await
            .map_err(db_err)?;
        if removed {
            Ok(MemoryOpResult::ok())
        } else {
            Ok(MemoryOpResult::error(format!("node not found: {node_id}")))
        }
    }

    async fn search(&self, query: &str, filters: Option<SearchFilter>) -> Result<Vec<GraphNode>> {
        let filters = filters.unwrap_or_default();
        let since_iso = filters.since_hours.map(|hours| {
            (self.time.now() - Duration::hours(i64::from(hours))).to_rfc3339()
        });
        let limit = filters
            .limit
            .map(|l| l as i64)
            .unwrap_or(DEFAULT_SEARCH_LIMIT);

        let rows = GraphRepository::search(
            &self.pool,
            query,
            filters.node_type,
            filters.scope,
            since_iso.as_deref(),
            limit,
        )
        .await
        .map_err(db_err)?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_node() {
                Ok(node) => nodes.push(node),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt graph node in search"),
            }
        }
        Ok(nodes)
    }

    async fn recall_timeseries(
        &self,
        scope: GraphScope,
        hours: u32,
        correlation_types: Option<Vec<String>>,
        handler_name: &str,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let since = (self.time.now() - Duration::hours(i64::from(hours))).to_rfc3339();

        // Correlation types name node classes; default to audit entries,
        // which is what the audit trail recall asks for.
        let node_types: Vec<NodeType> = match correlation_types {
            Some(types) => types
                .iter()
                .filter_map(|t| t.to_lowercase().parse().ok())
                .collect(),
            None => vec![NodeType::AuditEntry],
        };

        let mut points = Vec::new();
        for node_type in node_types {
            let rows = GraphRepository::nodes_since(&self.pool, node_type, scope, &since)
                .await
                .map_err(db_err)?;
            for row in rows {
                match row.into_node() {
                    Ok(node) => points.push(TimeSeriesPoint {
                        timestamp: node.updated_at,
                        node_id: node.id,
                        correlation_type: node_type.as_str().to_string(),
                        data: node.attributes,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            handler = handler_name,
                            error = %e,
                            "skipping corrupt graph node in timeseries recall"
                        );
                    }
                }
            }
        }
        points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(points)
    }
}
