//! Agent identity lifecycle
//!
//! The identity root lives at `agent/identity` in IDENTITY scope. On first
//! boot it is created from a YAML template; afterwards it is loaded and
//! never mutated except through `update_agent_identity`, which demands an
//! approver. A missing or corrupt identity at startup is fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use meridian_core::protocols::MemoryService;
use meridian_core::schemas::{
    ActionKind, AgentIdentityRoot, CoreProfile, GraphNode, GraphScope, IdentityMetadata,
    MemoryQuery, NodeType,
};
use meridian_core::time::TimeService;

use crate::{Result, RuntimeError};

/// Graph id of the identity root.
pub const IDENTITY_NODE_ID: &str = "agent/identity";

/// Identity template, consulted only at first boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub name: String,
    pub description: String,
    pub role_description: String,
    #[serde(default)]
    pub domain_specific_knowledge: BTreeMap<String, String>,
    #[serde(default)]
    pub permitted_actions: Option<Vec<ActionKind>>,
    #[serde(default)]
    pub restricted_capabilities: Option<Vec<String>>,
}

fn default_permitted_actions() -> Vec<ActionKind> {
    vec![
        ActionKind::Observe,
        ActionKind::Speak,
        ActionKind::Tool,
        ActionKind::Memorize,
        ActionKind::Recall,
        ActionKind::Forget,
        ActionKind::Defer,
        ActionKind::Reject,
        ActionKind::Ponder,
        ActionKind::TaskComplete,
    ]
}

fn default_restricted_capabilities() -> Vec<String> {
    vec![
        "identity_change_without_approval".to_string(),
        "profile_switching".to_string(),
        "unauthorized_data_access".to_string(),
    ]
}

/// Manages loading, creating, and updating the agent identity.
pub struct IdentityManager {
    memory: Arc<dyn MemoryService>,
    time: Arc<dyn TimeService>,
    template_directory: PathBuf,
    default_template: String,
    identity: RwLock<Option<AgentIdentityRoot>>,
}

impl IdentityManager {
    pub fn new(
        memory: Arc<dyn MemoryService>,
        time: Arc<dyn TimeService>,
        template_directory: PathBuf,
        default_template: String,
    ) -> Self {
        Self {
            memory,
            time,
            template_directory,
            default_template,
            identity: RwLock::new(None),
        }
    }

    /// Load the identity from the graph, creating it from a template on
    /// first boot. A present-but-corrupt identity refuses startup.
    pub async fn initialize_identity(&self) -> Result<AgentIdentityRoot> {
        let existing = self
            .memory
            .recall(MemoryQuery {
                node_id: IDENTITY_NODE_ID.to_string(),
                scope: GraphScope::Identity,
            })
            .await
            .map_err(|e| RuntimeError::Identity(format!("cannot read identity node: {e}")))?;

        let identity = match existing.into_iter().next() {
            Some(node) => {
                tracing::info!("loading existing agent identity from graph");
                let root: AgentIdentityRoot = serde_json::from_value(node.attributes)
                    .map_err(|e| {
                        RuntimeError::Identity(format!("identity node is corrupt: {e}"))
                    })?;
                if !root.has_required_fields() {
                    return Err(RuntimeError::Identity(
                        "identity node missing required fields".to_string(),
                    ));
                }
                root
            }
            None => {
                tracing::info!("no identity found, creating from template (first boot only)");
                let template = self.load_template().await?;
                let root = self.create_identity_from_template(&template);
                self.store_identity(&root, "system").await?;
                root
            }
        };

        *self.identity.write().await = Some(identity.clone());
        Ok(identity)
    }

    /// Currently loaded identity.
    pub async fn agent_identity(&self) -> Option<AgentIdentityRoot> {
        self.identity.read().await.clone()
    }

    /// Write a new identity version. Requires a non-empty approver id; the
    /// version number increases monotonically.
    pub async fn update_agent_identity(
        &self,
        mut new_root: AgentIdentityRoot,
        approved_by: &str,
    ) -> Result<AgentIdentityRoot> {
        if approved_by.trim().is_empty() {
            return Err(RuntimeError::Identity(
                "identity update requires a non-empty approver id".to_string(),
            ));
        }
        let current = self.identity.read().await.clone().ok_or_else(|| {
            RuntimeError::Identity("no identity loaded; cannot update".to_string())
        })?;

        new_root.version = current.version + 1;
        new_root.identity_metadata.last_modified = self.time.now();
        new_root.identity_metadata.modification_count =
            current.identity_metadata.modification_count + 1;
        new_root.identity_metadata.approved_by = Some(approved_by.to_string());
        new_root.identity_metadata.approval_timestamp = Some(self.time.now());

        self.store_identity(&new_root, approved_by).await?;
        *self.identity.write().await = Some(new_root.clone());
        tracing::info!(
            approved_by,
            version = new_root.version,
            "agent identity updated"
        );
        Ok(new_root)
    }

    /// Assert the identity is present with its required core fields.
    pub async fn verify_identity_integrity(&self) -> bool {
        match self.identity.read().await.as_ref() {
            Some(identity) if identity.has_required_fields() => true,
            Some(_) => {
                tracing::error!("identity missing required fields");
                false
            }
            None => {
                tracing::error!("no agent identity loaded");
                false
            }
        }
    }

    async fn store_identity(&self, root: &AgentIdentityRoot, updated_by: &str) -> Result<()> {
        let mut node = GraphNode::new(
            IDENTITY_NODE_ID,
            NodeType::AgentIdentity,
            GraphScope::Identity,
            serde_json::to_value(root)
                .map_err(|e| RuntimeError::Identity(format!("cannot serialize identity: {e}")))?,
            updated_by,
            self.time.now(),
        );
        node.version = root.version;

        let result = self
            .memory
            .memorize(node)
            .await
            .map_err(|e| RuntimeError::Identity(format!("cannot store identity: {e}")))?;
        if !result.is_ok() {
            return Err(RuntimeError::Identity(format!(
                "graph refused identity write: {:?}",
                result.reason
            )));
        }
        Ok(())
    }

    async fn load_template(&self) -> Result<AgentTemplate> {
        let primary = self
            .template_directory
            .join(format!("{}.yaml", self.default_template));
        match self.read_template(&primary) {
            Ok(template) => Ok(template),
            Err(e) => {
                tracing::warn!(
                    template = %self.default_template,
                    error = %e,
                    "configured template unavailable, falling back to default"
                );
                let fallback = self.template_directory.join("default.yaml");
                self.read_template(&fallback).map_err(|_| {
                    RuntimeError::Identity(
                        "no template available for initial identity creation".to_string(),
                    )
                })
            }
        }
    }

    fn read_template(&self, path: &Path) -> Result<AgentTemplate> {
        let content = std::fs::read_to_string(path)?;
        let template: AgentTemplate = serde_yaml::from_str(&content)?;
        if template.name.is_empty() {
            return Err(RuntimeError::Identity(format!(
                "template {path:?} has an empty name"
            )));
        }
        Ok(template)
    }

    fn create_identity_from_template(&self, template: &AgentTemplate) -> AgentIdentityRoot {
        let identity_string = format!(
            "{}:{}:{}",
            template.name, template.description, template.role_description
        );
        let identity_hash = hex::encode(Sha256::digest(identity_string.as_bytes()));
        let now = self.time.now();

        AgentIdentityRoot {
            agent_id: template.name.clone(),
            identity_hash,
            core_profile: CoreProfile {
                description: template.description.clone(),
                role_description: template.role_description.clone(),
                domain_specific_knowledge: template.domain_specific_knowledge.clone(),
            },
            identity_metadata: IdentityMetadata {
                created_at: now,
                last_modified: now,
                modification_count: 0,
                creator_agent_id: "system".to_string(),
                approval_required: true,
                approved_by: None,
                approval_timestamp: None,
            },
            permitted_actions: template
                .permitted_actions
                .clone()
                .unwrap_or_else(default_permitted_actions),
            restricted_capabilities: template
                .restricted_capabilities
                .clone()
                .unwrap_or_else(default_restricted_capabilities),
            version: 1,
        }
    }
}
