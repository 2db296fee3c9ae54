//! Audit record schemas

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable audit record.
///
/// The chain fields (`sequence_number`, `previous_hash`, `entry_hash`,
/// `signature`, `signing_key_id`) are populated only when the hash chain is
/// enabled; graph-only deployments leave them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub event_type: String,
    pub actor: String,
    pub details: BTreeMap<String, String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub sequence_number: Option<i64>,
    #[serde(default)]
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub entry_hash: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signing_key_id: Option<String>,
}

impl AuditEntry {
    /// Canonical payload string hashed into the chain. Details are a
    /// `BTreeMap`, so serialization is byte-stable across processes.
    pub fn payload_json(&self) -> String {
        #[derive(Serialize)]
        struct Payload<'a> {
            details: &'a BTreeMap<String, String>,
            outcome: &'a Option<String>,
        }
        serde_json::to_string(&Payload {
            details: &self.details,
            outcome: &self.outcome,
        })
        .unwrap_or_default()
    }
}

/// Query over the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Substring match over event type and actor.
    #[serde(default)]
    pub search_text: Option<String>,
    #[serde(default = "default_order_desc")]
    pub order_desc: bool,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_order_desc() -> bool {
    true
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            actor: None,
            event_type: None,
            entity_id: None,
            search_text: None,
            order_desc: true,
            offset: 0,
            limit: None,
        }
    }
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(start) = self.start_time {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &entry.event_type != event_type {
                return false;
            }
        }
        if let Some(entity_id) = &self.entity_id {
            if &entry.entity_id != entity_id {
                return false;
            }
        }
        if let Some(text) = &self.search_text {
            let needle = text.to_lowercase();
            if !entry.event_type.to_lowercase().contains(&needle)
                && !entry.actor.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Result of a full chain verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub total_entries: u64,
    pub valid_entries: u64,
    pub invalid_entries: u64,
    pub chain_intact: bool,
    #[serde(default)]
    pub first_invalid_entry: Option<i64>,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl VerificationReport {
    /// An empty chain verifies as intact.
    pub fn empty(duration_ms: u64) -> Self {
        Self {
            verified: true,
            total_entries: 0,
            valid_entries: 0,
            invalid_entries: 0,
            chain_intact: true,
            first_invalid_entry: None,
            duration_ms,
            errors: Vec::new(),
        }
    }
}
