//! Structured call contexts
//!
//! These replace loose string maps at the bus boundary: guidance and
//! deferral requests to the wise authority, and the two audit payload
//! shapes. Details use `BTreeMap` so serialized payloads are byte-stable,
//! which the audit hash chain depends on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::messages::FilterPriority;

/// Context for a guidance request to the wise authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceContext {
    pub thought_id: String,
    pub task_id: String,
    pub question: String,
    #[serde(default)]
    pub ethical_considerations: Vec<String>,
    #[serde(default)]
    pub domain_context: BTreeMap<String, String>,
}

/// Context for a deferral submitted to the wise authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferralContext {
    pub thought_id: String,
    pub task_id: String,
    pub reason: String,
    #[serde(default)]
    pub defer_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Option<FilterPriority>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DeferralContext {
    pub fn new(
        thought_id: impl Into<String>,
        task_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            thought_id: thought_id.into(),
            task_id: task_id.into(),
            reason: reason.into(),
            defer_until: None,
            priority: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Context attached when auditing an agent action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActionContext {
    pub thought_id: String,
    pub task_id: String,
    pub handler_name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AuditActionContext {
    pub fn new(
        thought_id: impl Into<String>,
        task_id: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            thought_id: thought_id.into(),
            task_id: task_id.into(),
            handler_name: handler_name.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Payload for a general audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventData {
    pub entity_id: String,
    pub actor: String,
    pub outcome: String,
    pub severity: String,
    pub action: String,
    pub resource: String,
    pub reason: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEventData {
    pub fn new(entity_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            actor: actor.into(),
            outcome: "success".to_string(),
            severity: "info".to_string(),
            action: String::new(),
            resource: String::new(),
            reason: "event_logged".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Flatten into the string-only detail map stored on audit entries.
    pub fn to_details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("entity_id".to_string(), self.entity_id.clone());
        details.insert("actor".to_string(), self.actor.clone());
        details.insert("outcome".to_string(), self.outcome.clone());
        details.insert("severity".to_string(), self.severity.clone());
        details.insert("action".to_string(), self.action.clone());
        details.insert("resource".to_string(), self.resource.clone());
        details.insert("reason".to_string(), self.reason.clone());
        for (key, value) in &self.metadata {
            details.insert(format!("meta_{key}"), value.clone());
        }
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_data_builder() {
        let data = AuditEventData::new("thought_1", "handler")
            .with_action("speak")
            .with_outcome("sent")
            .with_metadata("channel", "c1");

        let details = data.to_details();
        assert_eq!(details.get("action").unwrap(), "speak");
        assert_eq!(details.get("outcome").unwrap(), "sent");
        assert_eq!(details.get("meta_channel").unwrap(), "c1");
    }

    #[test]
    fn test_details_are_ordered() {
        let data = AuditEventData::new("e", "a")
            .with_metadata("zeta", "1")
            .with_metadata("alpha", "2");
        let details = data.to_details();
        let keys: Vec<_> = details.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
