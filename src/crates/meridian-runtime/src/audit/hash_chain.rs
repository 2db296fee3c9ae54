//! Append-only audit hash chain
//!
//! Every row links to its predecessor: `entry_hash` covers the entry's
//! identifying fields, its payload, its sequence number, and the previous
//! entry's hash. Sequence numbers are dense and start at 1; the genesis
//! entry links to an all-zero hash.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};

use meridian_core::schemas::AuditEntry;

/// Previous-hash value for sequence number 1.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One row of the `audit_log` chain table.
#[derive(Debug, Clone, FromRow)]
pub struct ChainRow {
    pub sequence_number: i64,
    pub entry_id: String,
    pub event_timestamp: String,
    pub event_type: String,
    pub entity_id: String,
    pub actor: String,
    pub event_payload: String,
    pub outcome: Option<String>,
    pub previous_hash: String,
    pub entry_hash: String,
    pub signature: String,
    pub signing_key_id: String,
    pub created_at: String,
}

impl ChainRow {
    /// Convert a chain row back into an audit entry.
    pub fn into_entry(self) -> Option<AuditEntry> {
        #[derive(serde::Deserialize)]
        struct Payload {
            details: BTreeMap<String, String>,
            outcome: Option<String>,
        }
        let payload: Payload = serde_json::from_str(&self.event_payload).ok()?;
        let timestamp = DateTime::parse_from_rfc3339(&self.event_timestamp)
            .ok()?
            .with_timezone(&Utc);
        Some(AuditEntry {
            entry_id: self.entry_id,
            timestamp,
            entity_id: self.entity_id,
            event_type: self.event_type,
            actor: self.actor,
            details: payload.details,
            outcome: payload.outcome,
            sequence_number: Some(self.sequence_number),
            previous_hash: Some(self.previous_hash),
            entry_hash: Some(self.entry_hash),
            signature: Some(self.signature),
            signing_key_id: Some(self.signing_key_id),
        })
    }
}

/// Compute the hash binding an entry into the chain.
pub fn compute_entry_hash(
    entry_id: &str,
    timestamp_iso: &str,
    event_type: &str,
    entity_id: &str,
    payload: &str,
    sequence_number: i64,
    previous_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry_id.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp_iso.as_bytes());
    hasher.update(b"|");
    hasher.update(event_type.as_bytes());
    hasher.update(b"|");
    hasher.update(entity_id.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.as_bytes());
    hasher.update(b"|");
    hasher.update(sequence_number.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Access to the chain table. All writes happen under the audit service's
/// chain lock; this type only issues the SQL.
pub struct AuditHashChain {
    pool: SqlitePool,
}

impl AuditHashChain {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Sequence number and hash of the newest entry, if any.
    pub async fn head(&self) -> Result<Option<(i64, String)>, sqlx::Error> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT sequence_number, entry_hash FROM audit_log \
             ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn append(&self, row: &ChainRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO audit_log (sequence_number, entry_id, event_timestamp, event_type, \
             entity_id, actor, event_payload, outcome, previous_hash, entry_hash, signature, \
             signing_key_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.sequence_number)
        .bind(&row.entry_id)
        .bind(&row.event_timestamp)
        .bind(&row.event_type)
        .bind(&row.entity_id)
        .bind(&row.actor)
        .bind(&row.event_payload)
        .bind(&row.outcome)
        .bind(&row.previous_hash)
        .bind(&row.entry_hash)
        .bind(&row.signature)
        .bind(&row.signing_key_id)
        .bind(&row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All entries in sequence order.
    pub async fn all_entries(&self) -> Result<Vec<ChainRow>, sqlx::Error> {
        sqlx::query_as::<_, ChainRow>(
            "SELECT * FROM audit_log ORDER BY sequence_number ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_audit_schema;

    fn row(seq: i64, prev: &str) -> ChainRow {
        let hash = compute_entry_hash("e", "t", "ev", "en", "{}", seq, prev);
        ChainRow {
            sequence_number: seq,
            entry_id: format!("e{seq}"),
            event_timestamp: "2026-01-01T00:00:00+00:00".into(),
            event_type: "ev".into(),
            entity_id: "en".into(),
            actor: "a".into(),
            event_payload: "{\"details\":{},\"outcome\":null}".into(),
            outcome: None,
            previous_hash: prev.into(),
            entry_hash: hash,
            signature: "sig".into(),
            signing_key_id: "key".into(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = compute_entry_hash("id", "ts", "ev", "en", "{}", 1, GENESIS_HASH);
        let b = compute_entry_hash("id", "ts", "ev", "en", "{}", 1, GENESIS_HASH);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = compute_entry_hash("id", "ts", "ev", "en", "{}", 1, GENESIS_HASH);
        assert_ne!(base, compute_entry_hash("id2", "ts", "ev", "en", "{}", 1, GENESIS_HASH));
        assert_ne!(base, compute_entry_hash("id", "ts", "ev", "en", "{}", 2, GENESIS_HASH));
        assert_ne!(base, compute_entry_hash("id", "ts", "ev", "en", "{}", 1, "ff"));
    }

    #[tokio::test]
    async fn test_head_and_append() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_audit_schema(&pool).await.unwrap();
        let chain = AuditHashChain::new(pool);

        assert!(chain.head().await.unwrap().is_none());

        let first = row(1, GENESIS_HASH);
        chain.append(&first).await.unwrap();
        let second = row(2, &first.entry_hash);
        chain.append(&second).await.unwrap();

        let (seq, hash) = chain.head().await.unwrap().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(hash, second.entry_hash);
        assert_eq!(chain.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejected() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_audit_schema(&pool).await.unwrap();
        let chain = AuditHashChain::new(pool);

        chain.append(&row(1, GENESIS_HASH)).await.unwrap();
        assert!(chain.append(&row(1, GENESIS_HASH)).await.is_err());
    }

    #[test]
    fn test_chain_row_into_entry() {
        let row = row(1, GENESIS_HASH);
        let entry = row.clone().into_entry().unwrap();
        assert_eq!(entry.sequence_number, Some(1));
        assert_eq!(entry.previous_hash.as_deref(), Some(GENESIS_HASH));
        assert_eq!(entry.event_type, "ev");
    }
}
