//! Consolidated audit service
//!
//! Primary storage is graph memory (every entry becomes an immutable
//! audit-entry node, stored via the memory bus); when signing is enabled, a
//! parallel chain row is appended under the chain lock. A bounded ring
//! cache serves recent queries, and a background exporter flushes entries
//! to a configured jsonl/csv/sqlite file every sixty seconds.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use meridian_core::buses::AuditEventSink;
use meridian_core::schemas::{
    ActionKind, AuditActionContext, AuditEntry, AuditEventData, AuditQuery, GraphNode,
    GraphScope, NodeType, SearchFilter, VerificationReport,
};
use meridian_core::time::TimeService;
use meridian_core::MemoryBus;

use crate::db::schema::init_export_schema;
use crate::{Result, RuntimeError};

use super::hash_chain::{compute_entry_hash, AuditHashChain, ChainRow, GENESIS_HASH};
use super::signature::SignatureManager;
use super::verifier::AuditVerifier;

const EXPORT_INTERVAL_SECS: u64 = 60;
const ONE_SHOT_EXPORT_LIMIT: usize = 10_000;
const HANDLER_NAME: &str = "audit_service";

/// Supported export file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jsonl,
    Csv,
    Sqlite,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::Sqlite => "sqlite",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "jsonl" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            "sqlite" => Ok(ExportFormat::Sqlite),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

struct ChainComponents {
    chain: AuditHashChain,
    signatures: SignatureManager,
    /// Serializes all chain appends.
    lock: AsyncMutex<()>,
}

struct ExportState {
    path: PathBuf,
    format: ExportFormat,
    buffer: AsyncMutex<Vec<AuditEntry>>,
    stop: watch::Sender<bool>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Construction parameters for [`AuditService`].
pub struct AuditServiceParams {
    pub memory_bus: Arc<MemoryBus>,
    pub time: Arc<dyn TimeService>,
    /// Chain database pool; `None` disables the hash chain.
    pub chain_pool: Option<SqlitePool>,
    /// Directory holding the signing key (used only with a chain pool).
    pub key_path: PathBuf,
    pub export_path: Option<PathBuf>,
    pub export_format: ExportFormat,
    pub retention_days: u32,
    pub cache_size: usize,
}

/// Typed, hash-chained audit log over graph memory.
pub struct AuditService {
    time: Arc<dyn TimeService>,
    memory_bus: Arc<MemoryBus>,
    chain: Option<ChainComponents>,
    cache: parking_lot::Mutex<VecDeque<AuditEntry>>,
    cache_size: usize,
    export: Option<ExportState>,
    retention_days: u32,
}

impl AuditService {
    /// Initialize the service: bring up chain components (fatal on signing
    /// failure) and prepare the export state.
    pub async fn init(params: AuditServiceParams) -> Result<Arc<Self>> {
        let chain = match params.chain_pool {
            Some(pool) => {
                crate::db::schema::init_audit_schema(&pool).await?;
                let signatures =
                    SignatureManager::init(&params.key_path, &pool, params.time.as_ref())
                        .await?;
                Some(ChainComponents {
                    chain: AuditHashChain::new(pool),
                    signatures,
                    lock: AsyncMutex::new(()),
                })
            }
            None => None,
        };

        let export = match params.export_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let (stop, _) = watch::channel(false);
                Some(ExportState {
                    path,
                    format: params.export_format,
                    buffer: AsyncMutex::new(Vec::new()),
                    stop,
                    worker: parking_lot::Mutex::new(None),
                })
            }
            None => None,
        };

        Ok(Arc::new(Self {
            time: params.time,
            memory_bus: params.memory_bus,
            chain,
            cache: parking_lot::Mutex::new(VecDeque::with_capacity(params.cache_size)),
            cache_size: params.cache_size,
            export,
            retention_days: params.retention_days,
        }))
    }

    /// Start the background export worker, if an export path is configured.
    pub fn start(self: &Arc<Self>) {
        if let Some(export) = &self.export {
            let mut stop_rx = export.stop.subscribe();
            let service = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                    EXPORT_INTERVAL_SECS,
                ));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = service.flush_exports().await {
                                tracing::error!(error = %e, "audit export flush failed");
                            }
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
            });
            *export.worker.lock() = Some(handle);
            tracing::info!("audit export worker started");
        }
    }

    /// Stop the service: stop the exporter, flush buffers, log the final
    /// shutdown event, then close the chain database.
    pub async fn stop(&self) {
        if let Some(export) = &self.export {
            let _ = export.stop.send(true);
            let handle = export.worker.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
        if let Err(e) = self.flush_exports().await {
            tracing::warn!(error = %e, "final audit export flush failed");
        }

        let pending = self
            .export
            .as_ref()
            .map(|e| e.buffer.try_lock().map(|b| b.len()).unwrap_or(0))
            .unwrap_or(0);
        let shutdown_event = AuditEventData::new(HANDLER_NAME, "system")
            .with_action("shutdown")
            .with_resource(HANDLER_NAME)
            .with_reason("service_shutdown")
            .with_metadata("cached_entries", self.cache.lock().len().to_string())
            .with_metadata("pending_exports", pending.to_string());
        if let Err(e) = self.log_event("audit_service_shutdown", shutdown_event).await {
            tracing::warn!(error = %e, "failed to log shutdown event");
        }
        if let Err(e) = self.flush_exports().await {
            tracing::warn!(error = %e, "post-shutdown export flush failed");
        }

        if let Some(chain) = &self.chain {
            chain.chain.pool().close().await;
        }
        tracing::info!("audit service stopped");
    }

    /// Log an agent action. `entity_id` is the originating thought.
    pub async fn log_action(
        &self,
        action: ActionKind,
        context: AuditActionContext,
        outcome: Option<String>,
    ) -> Result<AuditEntry> {
        let mut details: BTreeMap<String, String> = BTreeMap::new();
        details.insert("action_type".to_string(), action.as_str().to_string());
        details.insert("thought_id".to_string(), context.thought_id.clone());
        details.insert("task_id".to_string(), context.task_id.clone());
        details.insert("handler_name".to_string(), context.handler_name.clone());
        for (key, value) in &context.metadata {
            details.insert(format!("meta_{key}"), value.clone());
        }

        let actor = if context.handler_name.is_empty() {
            "system".to_string()
        } else {
            context.handler_name.clone()
        };
        let entry = AuditEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            timestamp: self.time.now(),
            entity_id: context.thought_id.clone(),
            event_type: action.as_str().to_string(),
            actor,
            details,
            outcome,
            sequence_number: None,
            previous_hash: None,
            entry_hash: None,
            signature: None,
            signing_key_id: None,
        };
        self.write_entry(entry).await
    }

    /// Log a general event.
    pub async fn log_event(
        &self,
        event_type: &str,
        data: AuditEventData,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            timestamp: self.time.now(),
            entity_id: data.entity_id.clone(),
            event_type: event_type.to_string(),
            actor: data.actor.clone(),
            details: data.to_details(),
            outcome: Some(data.outcome.clone()),
            sequence_number: None,
            previous_hash: None,
            entry_hash: None,
            signature: None,
            signing_key_id: None,
        };
        self.write_entry(entry).await
    }

    /// Log a conscience check decision.
    pub async fn log_conscience_event(
        &self,
        thought_id: &str,
        decision: &str,
        reasoning: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<AuditEntry> {
        let allowed = decision == "ALLOW";
        let mut data = AuditEventData::new(thought_id, "conscience_system")
            .with_action("conscience_check")
            .with_resource("conscience")
            .with_outcome(if allowed { "allowed" } else { "denied" })
            .with_severity(if allowed { "info" } else { "high" })
            .with_reason(reasoning);
        for (key, value) in metadata {
            data = data.with_metadata(key, value);
        }
        self.log_event("conscience_check", data).await
    }

    async fn write_entry(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        self.store_entry_in_graph(&entry).await;

        if let Some(chain) = &self.chain {
            let _guard = chain.lock.lock().await;
            let head = chain
                .chain
                .head()
                .await
                .map_err(|e| RuntimeError::Audit(format!("cannot read chain head: {e}")))?;
            let (sequence, previous_hash) = match head {
                Some((seq, hash)) => (seq + 1, hash),
                None => (1, GENESIS_HASH.to_string()),
            };

            let timestamp_iso = entry.timestamp.to_rfc3339();
            let payload = entry.payload_json();
            let entry_hash = compute_entry_hash(
                &entry.entry_id,
                &timestamp_iso,
                &entry.event_type,
                &entry.entity_id,
                &payload,
                sequence,
                &previous_hash,
            );
            let signature = chain.signatures.sign(&entry_hash);

            let row = ChainRow {
                sequence_number: sequence,
                entry_id: entry.entry_id.clone(),
                event_timestamp: timestamp_iso,
                event_type: entry.event_type.clone(),
                entity_id: entry.entity_id.clone(),
                actor: entry.actor.clone(),
                event_payload: payload,
                outcome: entry.outcome.clone(),
                previous_hash: previous_hash.clone(),
                entry_hash: entry_hash.clone(),
                signature: signature.clone(),
                signing_key_id: chain.signatures.key_id().to_string(),
                created_at: self.time.now_iso(),
            };
            chain
                .chain
                .append(&row)
                .await
                .map_err(|e| RuntimeError::Audit(format!("chain append failed: {e}")))?;

            entry.sequence_number = Some(sequence);
            entry.previous_hash = Some(previous_hash);
            entry.entry_hash = Some(entry_hash);
            entry.signature = Some(signature);
            entry.signing_key_id = Some(chain.signatures.key_id().to_string());
        }

        {
            let mut cache = self.cache.lock();
            if cache.len() == self.cache_size {
                cache.pop_front();
            }
            cache.push_back(entry.clone());
        }

        if let Some(export) = &self.export {
            export.buffer.lock().await.push(entry.clone());
        }

        Ok(entry)
    }

    async fn store_entry_in_graph(&self, entry: &AuditEntry) {
        let node = GraphNode::new(
            format!("audit/{}", entry.entry_id),
            NodeType::AuditEntry,
            GraphScope::Local,
            json!({
                "entry": entry,
                "context": {
                    "service_name": HANDLER_NAME,
                    "correlation_id": entry.entry_id,
                    "immutable": true,
                },
            }),
            HANDLER_NAME,
            entry.timestamp,
        );
        match self.memory_bus.memorize(HANDLER_NAME, node).await {
            Ok(result) if result.is_ok() => {}
            Ok(result) => {
                tracing::error!(status = ?result.status, "graph store refused audit entry");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to store audit entry in graph");
            }
        }
    }

    /// Recent entries intersecting the time window, newest first. Served
    /// from the ring cache plus graph time-series recall, deduplicated by
    /// entry id.
    pub async fn get_audit_trail(
        &self,
        entity_id: Option<&str>,
        hours: u32,
        action_types: Option<&[String]>,
    ) -> Result<Vec<AuditEntry>> {
        let window_start = self.time.now() - Duration::hours(i64::from(hours));
        let mut merged: HashMap<String, AuditEntry> = HashMap::new();

        for entry in self.cache.lock().iter() {
            merged.insert(entry.entry_id.clone(), entry.clone());
        }

        match self
            .memory_bus
            .recall_timeseries(
                HANDLER_NAME,
                GraphScope::Local,
                hours,
                Some(vec![NodeType::AuditEntry.as_str().to_string()]),
            )
            .await
        {
            Ok(points) => {
                for point in points {
                    if let Some(entry) = point
                        .data
                        .get("entry")
                        .and_then(|v| serde_json::from_value::<AuditEntry>(v.clone()).ok())
                    {
                        merged.entry(entry.entry_id.clone()).or_insert(entry);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "graph recall failed; serving cache only"),
        }

        let mut entries: Vec<AuditEntry> = merged
            .into_values()
            .filter(|e| e.timestamp >= window_start)
            .filter(|e| entity_id.map_or(true, |id| e.entity_id == id))
            .filter(|e| {
                action_types.map_or(true, |types| types.iter().any(|t| *t == e.event_type))
            })
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Query the audit trail with advanced filters, backed by graph search.
    pub async fn query_audit_trail(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let nodes = self
            .memory_bus
            .search(
                HANDLER_NAME,
                "audit/",
                Some(SearchFilter {
                    node_type: Some(NodeType::AuditEntry),
                    scope: Some(GraphScope::Local),
                    since_hours: None,
                    limit: Some(ONE_SHOT_EXPORT_LIMIT),
                }),
            )
            .await?;

        let mut entries: Vec<AuditEntry> = nodes
            .into_iter()
            .filter_map(|node| {
                node.attributes
                    .get("entry")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
            })
            .filter(|entry| query.matches(entry))
            .collect();

        if query.order_desc {
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        } else {
            entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }

        let start = query.offset.min(entries.len());
        let end = match query.limit {
            Some(limit) => (start + limit).min(entries.len()),
            None => entries.len(),
        };
        Ok(entries[start..end].to_vec())
    }

    /// Verify the whole chain. Reports defects; never corrects them.
    pub async fn verify_audit_integrity(&self) -> VerificationReport {
        match &self.chain {
            Some(chain) => {
                AuditVerifier::verify_complete_chain(chain.chain.pool(), self.time.as_ref())
                    .await
            }
            None => VerificationReport {
                verified: false,
                total_entries: 0,
                valid_entries: 0,
                invalid_entries: 0,
                chain_intact: false,
                first_invalid_entry: None,
                duration_ms: 0,
                errors: vec!["hash chain not enabled".to_string()],
            },
        }
    }

    /// Comprehensive verification report.
    pub async fn get_verification_report(&self) -> VerificationReport {
        self.verify_audit_integrity().await
    }

    /// One-shot export of up to 10 000 entries, returning the file path.
    pub async fn export_audit_data(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
        format: Option<ExportFormat>,
    ) -> Result<PathBuf> {
        let export = self.export.as_ref().ok_or_else(|| {
            RuntimeError::Audit("export path not configured".to_string())
        })?;
        let format = format.unwrap_or(export.format);

        let query = AuditQuery {
            start_time: start,
            end_time: end,
            limit: Some(ONE_SHOT_EXPORT_LIMIT),
            ..Default::default()
        };
        let entries = self.query_audit_trail(&query).await?;

        let stamp = self.time.now().format("%Y%m%d_%H%M%S");
        let dir = export
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = dir.join(format!("audit_export_{stamp}.{}", format.extension()));

        write_entries(&file, format, entries).await?;
        Ok(file)
    }

    /// Remove audit nodes older than the retention window from graph
    /// storage. The chain database is never rewritten.
    pub async fn prune_expired(&self) -> Result<u64> {
        let cutoff = self.time.now() - Duration::days(i64::from(self.retention_days));
        let nodes = self
            .memory_bus
            .search(
                HANDLER_NAME,
                "audit/",
                Some(SearchFilter {
                    node_type: Some(NodeType::AuditEntry),
                    scope: Some(GraphScope::Local),
                    since_hours: None,
                    limit: Some(ONE_SHOT_EXPORT_LIMIT),
                }),
            )
            .await?;

        let mut removed = 0u64;
        for node in nodes {
            if node.updated_at < cutoff {
                match self
                    .memory_bus
                    .forget(HANDLER_NAME, &node.id, GraphScope::Local)
                    .await
                {
                    Ok(result) if result.is_ok() => removed += 1,
                    Ok(_) | Err(_) => {}
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "pruned expired audit nodes from graph storage");
        }
        Ok(removed)
    }

    async fn flush_exports(&self) -> Result<()> {
        let Some(export) = &self.export else {
            return Ok(());
        };
        let drained: Vec<AuditEntry> = {
            let mut buffer = export.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return Ok(());
        }
        write_entries(&export.path, export.format, drained).await
    }
}

#[async_trait]
impl AuditEventSink for AuditService {
    async fn log_event(&self, event_type: &str, data: AuditEventData) {
        if let Err(e) = AuditService::log_event(self, event_type, data).await {
            tracing::error!(event_type, error = %e, "failed to log audit event");
        }
    }
}

/// Append entries to a file in the given format. File writes run on the
/// blocking pool; the sqlite format opens its own short-lived pool.
async fn write_entries(
    path: &Path,
    format: ExportFormat,
    entries: Vec<AuditEntry>,
) -> Result<()> {
    match format {
        ExportFormat::Jsonl => {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || write_jsonl(&path, &entries))
                .await
                .map_err(|e| RuntimeError::Audit(format!("export task failed: {e}")))??;
        }
        ExportFormat::Csv => {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || write_csv(&path, &entries))
                .await
                .map_err(|e| RuntimeError::Audit(format!("export task failed: {e}")))??;
        }
        ExportFormat::Sqlite => write_sqlite(path, &entries).await?,
    }
    Ok(())
}

fn write_jsonl(path: &Path, entries: &[AuditEntry]) -> Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|e| RuntimeError::Audit(format!("cannot serialize entry: {e}")))?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}

fn write_csv(path: &Path, entries: &[AuditEntry]) -> Result<()> {
    let needs_header = !path.exists()
        || std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if needs_header {
        writer
            .write_record([
                "entry_id",
                "timestamp",
                "entity_id",
                "event_type",
                "actor",
                "outcome",
                "details",
            ])
            .map_err(|e| RuntimeError::Audit(format!("csv header: {e}")))?;
    }
    for entry in entries {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| RuntimeError::Audit(format!("cannot serialize details: {e}")))?;
        writer
            .write_record([
                entry.entry_id.as_str(),
                &entry.timestamp.to_rfc3339(),
                entry.entity_id.as_str(),
                entry.event_type.as_str(),
                entry.actor.as_str(),
                entry.outcome.as_deref().unwrap_or(""),
                details.as_str(),
            ])
            .map_err(|e| RuntimeError::Audit(format!("csv row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| RuntimeError::Audit(format!("csv flush: {e}")))?;
    Ok(())
}

async fn write_sqlite(path: &Path, entries: &[AuditEntry]) -> Result<()> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    init_export_schema(&pool).await?;

    for entry in entries {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| RuntimeError::Audit(format!("cannot serialize details: {e}")))?;
        sqlx::query(
            "INSERT OR REPLACE INTO audit_export (entry_id, timestamp, entity_id, \
             event_type, actor, outcome, details) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id)
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.entity_id)
        .bind(&entry.event_type)
        .bind(&entry.actor)
        .bind(&entry.outcome)
        .bind(details)
        .execute(&pool)
        .await?;
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_parse() {
        assert_eq!("jsonl".parse::<ExportFormat>().unwrap(), ExportFormat::Jsonl);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_jsonl_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let entry = AuditEntry {
            entry_id: "e1".into(),
            timestamp: chrono::Utc::now(),
            entity_id: "thought_1".into(),
            event_type: "speak".into(),
            actor: "processor".into(),
            details: Default::default(),
            outcome: None,
            sequence_number: None,
            previous_hash: None,
            entry_hash: None,
            signature: None,
            signing_key_id: None,
        };

        write_jsonl(&path, std::slice::from_ref(&entry)).unwrap();
        write_jsonl(&path, std::slice::from_ref(&entry)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_csv_writer_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        let entry = AuditEntry {
            entry_id: "e1".into(),
            timestamp: chrono::Utc::now(),
            entity_id: "thought_1".into(),
            event_type: "speak".into(),
            actor: "processor".into(),
            details: Default::default(),
            outcome: Some("sent".into()),
            sequence_number: None,
            previous_hash: None,
            entry_hash: None,
            signature: None,
            signing_key_id: None,
        };

        write_csv(&path, std::slice::from_ref(&entry)).unwrap();
        write_csv(&path, std::slice::from_ref(&entry)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with("entry_id,"));
    }
}
