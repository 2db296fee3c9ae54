//! Agent identity schemas
//!
//! The identity root is the canonical, graph-stored description of this
//! agent instance. It is created once at first boot from a template and
//! afterwards only changes through an approved update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action kinds an identity may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Observe,
    Speak,
    Tool,
    Memorize,
    Recall,
    Forget,
    Defer,
    Reject,
    Ponder,
    TaskComplete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Observe => "observe",
            ActionKind::Speak => "speak",
            ActionKind::Tool => "tool",
            ActionKind::Memorize => "memorize",
            ActionKind::Recall => "recall",
            ActionKind::Forget => "forget",
            ActionKind::Defer => "defer",
            ActionKind::Reject => "reject",
            ActionKind::Ponder => "ponder",
            ActionKind::TaskComplete => "task_complete",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavioral core of the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreProfile {
    pub description: String,
    pub role_description: String,
    #[serde(default)]
    pub domain_specific_knowledge: std::collections::BTreeMap<String, String>,
}

/// Provenance and approval state of the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub modification_count: u32,
    pub creator_agent_id: String,
    pub approval_required: bool,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approval_timestamp: Option<DateTime<Utc>>,
}

/// The canonical identity record stored at `agent/identity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentityRoot {
    pub agent_id: String,
    /// SHA-256 over `name:description:role_description`, fixed at creation.
    pub identity_hash: String,
    pub core_profile: CoreProfile,
    pub identity_metadata: IdentityMetadata,
    pub permitted_actions: Vec<ActionKind>,
    pub restricted_capabilities: Vec<String>,
    /// Monotonically increasing; bumped on every approved update.
    #[serde(default = "default_version")]
    pub version: i64,
}

fn default_version() -> i64 {
    1
}

impl AgentIdentityRoot {
    /// Check the fields required for a loaded identity to be usable.
    pub fn has_required_fields(&self) -> bool {
        !self.agent_id.is_empty()
            && !self.identity_hash.is_empty()
            && !self.core_profile.description.is_empty()
    }

    pub fn permits(&self, action: ActionKind) -> bool {
        self.permitted_actions.contains(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> AgentIdentityRoot {
        AgentIdentityRoot {
            agent_id: "meridian".to_string(),
            identity_hash: "ab".repeat(32),
            core_profile: CoreProfile {
                description: "an agent".to_string(),
                role_description: "assistant".to_string(),
                domain_specific_knowledge: Default::default(),
            },
            identity_metadata: IdentityMetadata {
                created_at: Utc::now(),
                last_modified: Utc::now(),
                modification_count: 0,
                creator_agent_id: "system".to_string(),
                approval_required: true,
                approved_by: None,
                approval_timestamp: None,
            },
            permitted_actions: vec![ActionKind::Observe, ActionKind::Speak],
            restricted_capabilities: vec!["identity_change_without_approval".to_string()],
            version: 1,
        }
    }

    #[test]
    fn test_required_fields() {
        assert!(root().has_required_fields());
        let mut broken = root();
        broken.identity_hash.clear();
        assert!(!broken.has_required_fields());
    }

    #[test]
    fn test_permits() {
        let identity = root();
        assert!(identity.permits(ActionKind::Speak));
        assert!(!identity.permits(ActionKind::Tool));
    }

    #[test]
    fn test_serde_round_trip() {
        let identity = root();
        let json = serde_json::to_value(&identity).unwrap();
        let back: AgentIdentityRoot = serde_json::from_value(json).unwrap();
        assert_eq!(back.agent_id, identity.agent_id);
        assert_eq!(back.version, 1);
    }
}
