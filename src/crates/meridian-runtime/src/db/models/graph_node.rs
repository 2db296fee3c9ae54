//! Graph node model for database persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use meridian_core::schemas::{GraphNode, GraphScope, NodeType};

/// A typed graph node as stored in the `graph_nodes` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GraphNodeRow {
    pub id: String,
    pub scope: String,
    pub node_type: String,
    /// JSON-encoded attributes
    pub attributes: String,
    pub version: i64,
    pub updated_by: String,
    pub updated_at: String,
}

impl GraphNodeRow {
    pub fn from_node(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            scope: node.scope.as_str().to_string(),
            node_type: node.node_type.as_str().to_string(),
            attributes: node.attributes.to_string(),
            version: node.version,
            updated_by: node.updated_by.clone(),
            updated_at: node.updated_at.to_rfc3339(),
        }
    }

    /// Convert back to the schema type. Rows with unknown scope or type are
    /// rejected rather than silently coerced.
    pub fn into_node(self) -> Result<GraphNode, String> {
        let scope: GraphScope = self.scope.parse()?;
        let node_type: NodeType = self.node_type.parse()?;
        let attributes =
            serde_json::from_str(&self.attributes).map_err(|e| format!("bad attributes: {e}"))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| format!("bad timestamp: {e}"))?
            .with_timezone(&Utc);
        Ok(GraphNode {
            id: self.id,
            node_type,
            scope,
            attributes,
            version: self.version,
            updated_by: self.updated_by,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let node = GraphNode::new(
            "agent/identity",
            NodeType::AgentIdentity,
            GraphScope::Identity,
            serde_json::json!({"agent_id": "meridian"}),
            "system",
            Utc::now(),
        );
        let row = GraphNodeRow::from_node(&node);
        let back = row.into_node().unwrap();
        assert_eq!(back.id, node.id);
        assert_eq!(back.scope, node.scope);
        assert_eq!(back.attributes["agent_id"], "meridian");
    }

    #[test]
    fn test_bad_scope_rejected() {
        let row = GraphNodeRow {
            id: "n".into(),
            scope: "galactic".into(),
            node_type: "concept".into(),
            attributes: "{}".into(),
            version: 1,
            updated_by: "x".into(),
            updated_at: Utc::now().to_rfc3339(),
        };
        assert!(row.into_node().is_err());
    }
}
