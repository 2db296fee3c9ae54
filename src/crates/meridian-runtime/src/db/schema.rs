//! Explicit schema creation
//!
//! Schemas are created at startup with `CREATE TABLE IF NOT EXISTS`; the
//! audit chain table additionally enforces a unique, dense sequence.

use sqlx::SqlitePool;

/// Create the main database schema: tasks, thoughts, correlations, and the
/// graph store.
pub async fn init_main_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            origin_adapter TEXT NOT NULL,
            origin_channel TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS thoughts (
            id TEXT PRIMARY KEY,
            source_task_id TEXT NOT NULL REFERENCES tasks(id),
            parent_thought_id TEXT,
            thought_type TEXT NOT NULL,
            status TEXT NOT NULL,
            round_number INTEGER NOT NULL DEFAULT 0,
            content TEXT NOT NULL DEFAULT '',
            priority INTEGER NOT NULL DEFAULT 0,
            processing_context TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_thoughts_status
         ON thoughts(status, priority, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS correlations (
            correlation_id TEXT PRIMARY KEY,
            service_kind TEXT NOT NULL,
            handler_name TEXT NOT NULL,
            action_type TEXT NOT NULL,
            request_data TEXT NOT NULL,
            response_data TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS graph_nodes (
            id TEXT NOT NULL,
            scope TEXT NOT NULL,
            node_type TEXT NOT NULL,
            attributes TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (id, scope)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_graph_nodes_type
         ON graph_nodes(node_type, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the audit database schema: the hash-chained log and signing keys.
pub async fn init_audit_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_log (
            sequence_number INTEGER PRIMARY KEY,
            entry_id TEXT NOT NULL UNIQUE,
            event_timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            actor TEXT NOT NULL,
            event_payload TEXT NOT NULL,
            outcome TEXT,
            previous_hash TEXT NOT NULL,
            entry_hash TEXT NOT NULL,
            signature TEXT NOT NULL,
            signing_key_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(sequence_number)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp
         ON audit_log(event_timestamp)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_event_type
         ON audit_log(event_type)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_signing_keys (
            key_id TEXT PRIMARY KEY,
            public_key TEXT NOT NULL,
            algorithm TEXT NOT NULL,
            key_size INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            revoked_at TEXT
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the secrets database schema.
pub async fn init_secrets_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS secrets (
            secret_ref TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            pattern_name TEXT NOT NULL,
            nonce BLOB NOT NULL,
            ciphertext BLOB NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the audit export table in a standalone export database.
pub async fn init_export_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_export (
            entry_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            actor TEXT NOT NULL,
            outcome TEXT,
            details TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
