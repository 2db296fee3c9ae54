//! Graph memory schemas
//!
//! The graph store is an external collaborator; these types define what
//! crosses the memory bus. Nodes are typed, versioned, and scoped, and
//! identity-scope writes require an approver (enforced by the provider).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Visibility/durability scope of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphScope {
    Local,
    Identity,
    Community,
}

impl GraphScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphScope::Local => "local",
            GraphScope::Identity => "identity",
            GraphScope::Community => "community",
        }
    }
}

impl std::str::FromStr for GraphScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(GraphScope::Local),
            "identity" => Ok(GraphScope::Identity),
            "community" => Ok(GraphScope::Community),
            other => Err(format!("unknown graph scope: {other}")),
        }
    }
}

impl std::fmt::Display for GraphScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of a graph node; attributes are strongly typed per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    AuditEntry,
    AgentIdentity,
    Config,
    Telemetry,
    Observation,
    Concept,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::AuditEntry => "audit_entry",
            NodeType::AgentIdentity => "agent_identity",
            NodeType::Config => "config",
            NodeType::Telemetry => "telemetry",
            NodeType::Observation => "observation",
            NodeType::Concept => "concept",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audit_entry" => Ok(NodeType::AuditEntry),
            "agent_identity" => Ok(NodeType::AgentIdentity),
            "config" => Ok(NodeType::Config),
            "telemetry" => Ok(NodeType::Telemetry),
            "observation" => Ok(NodeType::Observation),
            "concept" => Ok(NodeType::Concept),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, versioned record in graph memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub scope: GraphScope,
    /// Attributes are immutable once written; updates create a new version.
    pub attributes: Value,
    pub version: i64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        scope: GraphScope,
        attributes: Value,
        updated_by: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type,
            scope,
            attributes,
            version: 1,
            updated_by: updated_by.into(),
            updated_at,
        }
    }
}

/// Outcome of a memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOpStatus {
    Ok,
    Denied,
    Error,
}

/// Result of a memorize/forget call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryOpResult {
    pub status: MemoryOpStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl MemoryOpResult {
    pub fn ok() -> Self {
        Self {
            status: MemoryOpStatus::Ok,
            reason: None,
            data: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            status: MemoryOpStatus::Denied,
            reason: Some(reason.into()),
            data: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: MemoryOpStatus::Error,
            reason: Some(reason.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == MemoryOpStatus::Ok
    }
}

/// Lookup of a specific node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub node_id: String,
    pub scope: GraphScope,
}

/// Filters for a free-text graph search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub scope: Option<GraphScope>,
    #[serde(default)]
    pub since_hours: Option<u32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One datapoint from a time-series recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub correlation_type: String,
    pub data: Value,
}
