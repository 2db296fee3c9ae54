//! Graph node repository for database operations

use sqlx::SqlitePool;

use meridian_core::schemas::{GraphScope, NodeType};

use crate::db::models::GraphNodeRow;

/// Repository over the `graph_nodes` table.
pub struct GraphRepository;

impl GraphRepository {
    /// Insert or replace a node. The caller sets the version; updates to an
    /// existing node should pass `existing.version + 1`.
    pub async fn upsert(pool: &SqlitePool, row: &GraphNodeRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO graph_nodes (id, scope, node_type, attributes, version, \
             updated_by, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id, scope) DO UPDATE SET \
             node_type = excluded.node_type, attributes = excluded.attributes, \
             version = excluded.version, updated_by = excluded.updated_by, \
             updated_at = excluded.updated_at",
        )
        .bind(&row.id)
        .bind(&row.scope)
        .bind(&row.node_type)
        .bind(&row.attributes)
        .bind(row.version)
        .bind(&row.updated_by)
        .bind(&row.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        pool: &SqlitePool,
        id: &str,
        scope: GraphScope,
    ) -> Result<Option<GraphNodeRow>, sqlx::Error> {
        sqlx::query_as::<_, GraphNodeRow>(
            "SELECT * FROM graph_nodes WHERE id = ? AND scope = ?",
        )
        .bind(id)
        .bind(scope.as_str())
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(
        pool: &SqlitePool,
        id: &str,
        scope: GraphScope,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM graph_nodes WHERE id = ? AND scope = ?")
            .bind(id)
            .bind(scope.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Substring search over node ids and attributes, optionally filtered by
    /// type, scope, and recency.
    pub async fn search(
        pool: &SqlitePool,
        text: &str,
        node_type: Option<NodeType>,
        scope: Option<GraphScope>,
        since_iso: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GraphNodeRow>, sqlx::Error> {
        let mut sql = String::from(
            "SELECT * FROM graph_nodes WHERE (id LIKE ? OR attributes LIKE ?)",
        );
        if node_type.is_some() {
            sql.push_str(" AND node_type = ?");
        }
        if scope.is_some() {
            sql.push_str(" AND scope = ?");
        }
        if since_iso.is_some() {
            sql.push_str(" AND updated_at >= ?");
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");

        let pattern = format!("%{text}%");
        let mut query = sqlx::query_as::<_, GraphNodeRow>(&sql)
            .bind(pattern.clone())
            .bind(pattern);
        if let Some(node_type) = node_type {
            query = query.bind(node_type.as_str());
        }
        if let Some(scope) = scope {
            query = query.bind(scope.as_str());
        }
        if let Some(since) = since_iso {
            query = query.bind(since.to_string());
        }
        query.bind(limit).fetch_all(pool).await
    }

    /// Nodes of a type updated at or after the given instant.
    pub async fn nodes_since(
        pool: &SqlitePool,
        node_type: NodeType,
        scope: GraphScope,
        since_iso: &str,
    ) -> Result<Vec<GraphNodeRow>, sqlx::Error> {
        sqlx::query_as::<_, GraphNodeRow>(
            "SELECT * FROM graph_nodes WHERE node_type = ? AND scope = ? \
             AND updated_at >= ? ORDER BY updated_at DESC",
        )
        .bind(node_type.as_str())
        .bind(scope.as_str())
        .bind(since_iso)
        .fetch_all(pool)
        .await
    }

    /// Delete nodes of a type older than the cutoff. Used by audit retention;
    /// the chain database is never touched by this.
    pub async fn delete_older_than(
        pool: &SqlitePool,
        node_type: NodeType,
        cutoff_iso: &str,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM graph_nodes WHERE node_type = ? AND updated_at < ?")
                .bind(node_type.as_str())
                .bind(cutoff_iso)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_main_schema;
    use chrono::Utc;
    use meridian_core::schemas::GraphNode;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_main_schema(&pool).await.unwrap();
        pool
    }

    fn node(id: &str, node_type: NodeType, scope: GraphScope) -> GraphNodeRow {
        GraphNodeRow::from_node(&GraphNode::new(
            id,
            node_type,
            scope,
            serde_json::json!({"label": id}),
            "tester",
            Utc::now(),
        ))
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let pool = pool().await;
        let row = node("concept/greeting", NodeType::Concept, GraphScope::Local);
        GraphRepository::upsert(&pool, &row).await.unwrap();

        let loaded = GraphRepository::get(&pool, "concept/greeting", GraphScope::Local)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.version, 1);

        let mut updated = loaded.clone();
        updated.version = 2;
        GraphRepository::upsert(&pool, &updated).await.unwrap();
        let reloaded = GraphRepository::get(&pool, "concept/greeting", GraphScope::Local)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.version, 2);
    }

    #[tokio::test]
    async fn test_scoped_ids_are_distinct() {
        let pool = pool().await;
        GraphRepository::upsert(&pool, &node("n", NodeType::Concept, GraphScope::Local))
            .await
            .unwrap();
        GraphRepository::upsert(&pool, &node("n", NodeType::Concept, GraphScope::Identity))
            .await
            .unwrap();

        assert!(GraphRepository::get(&pool, "n", GraphScope::Local)
            .await
            .unwrap()
            .is_some());
        assert!(GraphRepository::get(&pool, "n", GraphScope::Identity)
            .await
            .unwrap()
            .is_some());
        assert!(GraphRepository::delete(&pool, "n", GraphScope::Local)
            .await
            .unwrap());
        assert!(GraphRepository::get(&pool, "n", GraphScope::Identity)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_search_with_filters() {
        let pool = pool().await;
        GraphRepository::upsert(
            &pool,
            &node("audit/one", NodeType::AuditEntry, GraphScope::Local),
        )
        .await
        .unwrap();
        GraphRepository::upsert(
            &pool,
            &node("concept/one", NodeType::Concept, GraphScope::Local),
        )
        .await
        .unwrap();

        let hits = GraphRepository::search(
            &pool,
            "one",
            Some(NodeType::AuditEntry),
            Some(GraphScope::Local),
            None,
            10,
        )
        .await
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "audit/one");
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let pool = pool().await;
        let mut old = node("audit/old", NodeType::AuditEntry, GraphScope::Local);
        old.updated_at = "2020-01-01T00:00:00+00:00".to_string();
        GraphRepository::upsert(&pool, &old).await.unwrap();
        GraphRepository::upsert(
            &pool,
            &node("audit/new", NodeType::AuditEntry, GraphScope::Local),
        )
        .await
        .unwrap();

        let removed = GraphRepository::delete_older_than(
            &pool,
            NodeType::AuditEntry,
            "2025-01-01T00:00:00+00:00",
        )
        .await
        .unwrap();
        assert_eq!(removed, 1);
        assert!(GraphRepository::get(&pool, "audit/new", GraphScope::Local)
            .await
            .unwrap()
            .is_some());
    }
}
