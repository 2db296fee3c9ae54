//! Service protocol traits
//!
//! The base protocol is deliberately narrow (start/stop, health,
//! capabilities); each service kind adds its own operations in a separate
//! trait. Providers of different kinds have different method sets, so the
//! registry stores them under kind-typed maps rather than one unified
//! interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::schemas::{
    DeferralContext, FilterVerdict, GraphNode, GraphScope, GuidanceContext, IncomingMessage,
    MemoryOpResult, MemoryQuery, SearchFilter, TimeSeriesPoint, ToolResult,
};

/// Narrow lifecycle protocol every registered provider implements.
#[async_trait]
pub trait RuntimeService: Send + Sync {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Outbound messaging to a channel on some adapter.
#[async_trait]
pub trait CommunicationService: RuntimeService {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<bool>;

    async fn fetch_messages(&self, channel_id: &str, limit: usize)
        -> Result<Vec<IncomingMessage>>;
}

/// Human-authority escalation endpoint.
#[async_trait]
pub trait WiseAuthorityService: RuntimeService {
    async fn fetch_guidance(&self, context: GuidanceContext) -> Result<Option<String>>;

    async fn submit_deferral(&self, context: DeferralContext) -> Result<bool>;
}

/// Tool execution surface.
#[async_trait]
pub trait ToolService: RuntimeService {
    async fn execute_tool(&self, name: &str, params: Value) -> Result<ToolResult>;

    async fn get_tool_result(
        &self,
        correlation_id: &str,
        timeout_secs: u64,
    ) -> Result<Option<ToolResult>>;

    fn available_tools(&self) -> Vec<String>;
}

/// Typed graph memory store.
#[async_trait]
pub trait MemoryService: RuntimeService {
    async fn memorize(&self, node: GraphNode) -> Result<MemoryOpResult>;

    async fn recall(&self, query: MemoryQuery) -> Result<Vec<GraphNode>>;

    async fn forget(&self, node_id: &str, scope: GraphScope) -> Result<MemoryOpResult>;

    async fn search(&self, query: &str, filters: Option<SearchFilter>) -> Result<Vec<GraphNode>>;

    async fn recall_timeseries(
        &self,
        scope: GraphScope,
        hours: u32,
        correlation_types: Option<Vec<String>>,
        handler_name: &str,
    ) -> Result<Vec<TimeSeriesPoint>>;
}

/// Completion from a language-model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub content: String,
    pub tokens_used: u64,
}

/// Language-model provider. The concrete client is out of scope; the core
/// only routes and audits calls to it.
#[async_trait]
pub trait LlmService: RuntimeService {
    async fn complete(&self, prompt: &str) -> Result<LlmCompletion>;
}

/// Adaptive ingress filter consulted by observers.
#[async_trait]
pub trait AdaptiveFilterService: RuntimeService {
    async fn evaluate(&self, message: &IncomingMessage, origin: &str) -> Result<FilterVerdict>;
}

/// Reference to a stored secret, carried in place of the raw value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRef {
    pub secret_ref: String,
    pub pattern_name: String,
}

/// Secrets detection and encapsulation pipeline.
#[async_trait]
pub trait SecretsService: RuntimeService {
    /// Replace detected secrets with opaque references, persisting the
    /// mapping. Returns the cleaned text and the references created.
    async fn process_incoming_text(
        &self,
        text: &str,
        source_id: &str,
    ) -> Result<(String, Vec<SecretRef>)>;

    /// Decrypt a stored secret for authorized decapsulation.
    async fn decrypt_secret(&self, secret_ref: &str) -> Result<Option<String>>;
}
