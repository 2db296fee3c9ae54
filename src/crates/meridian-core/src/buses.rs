//! Typed service buses
//!
//! Each bus is a thin asynchronous facade over the registry for one service
//! kind: it validates input, opens a correlation, selects a provider,
//! re-checks the breaker after selection (a racing failure can open it
//! between selection and dispatch), awaits the call under a timeout, and
//! classifies the outcome. Transient failures and timeouts increment the
//! breaker and fall back to the next eligible provider; validation and
//! permanent errors surface immediately. Callers above the bus always see a
//! single success-or-failure result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{CoreError, Result};
use crate::protocols::{
    CommunicationService, LlmCompletion, LlmService, MemoryService, ToolService,
    WiseAuthorityService,
};
use crate::registry::{ProviderRegistry, Selected, ServiceRegistry};
use crate::schemas::{
    AuditEventData, Correlation, DeferralContext, GraphNode, GraphScope, GuidanceContext,
    IncomingMessage, MemoryOpResult, MemoryQuery, SearchFilter, TimeSeriesPoint, ToolResult,
};
use crate::time::TimeService;

/// Persistence port for correlation rows. Implemented over the main
/// database by the runtime crate; tests use an in-memory store.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn begin(&self, correlation: &Correlation) -> Result<()>;

    async fn complete(&self, correlation_id: &str, response: Value) -> Result<()>;

    async fn fail(&self, correlation_id: &str, error: &str) -> Result<()>;
}

/// Audit port for bus-level events. The memory bus is constructed without
/// one: audit storage itself flows through the memory bus, and auditing
/// those writes would recurse.
#[async_trait]
pub trait AuditEventSink: Send + Sync {
    async fn log_event(&self, event_type: &str, data: AuditEventData);
}

/// Shared bus plumbing: correlation tracking, audit emission, timeout.
pub struct BusKernel {
    correlations: Arc<dyn CorrelationStore>,
    audit: Option<Arc<dyn AuditEventSink>>,
    time: Arc<dyn TimeService>,
    timeout: Duration,
}

impl BusKernel {
    pub fn new(
        correlations: Arc<dyn CorrelationStore>,
        audit: Option<Arc<dyn AuditEventSink>>,
        time: Arc<dyn TimeService>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            correlations,
            audit,
            time,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Dispatch one call with provider fallback.
    ///
    /// `op` is invoked once per attempted provider. The first provider comes
    /// from `select` (which advances round-robin cursors); remaining
    /// candidates are tried in selection order after retryable failures.
    pub async fn call<S, T, F, Fut>(
        &self,
        registry: &ProviderRegistry<S>,
        handler: &str,
        action_type: &str,
        required: &[&str],
        request: Value,
        op: F,
    ) -> Result<T>
    where
        S: ?Sized,
        T: Serialize,
        F: Fn(Arc<S>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let kind = registry.kind();
        let correlation = Correlation::begin(
            kind.as_str(),
            handler,
            action_type,
            request,
            self.time.now(),
        );
        if let Err(err) = self.correlations.begin(&correlation).await {
            tracing::warn!(%kind, action_type, error = %err, "failed to open correlation");
        }

        let Some(primary) = registry.select(Some(handler), required) else {
            let err = CoreError::unavailable(kind.as_str());
            self.resolve_failure(&correlation, &err).await;
            return Err(err);
        };

        let mut attempts: Vec<Selected<S>> = vec![primary];
        for candidate in registry.candidates(Some(handler), required) {
            if !attempts.iter().any(|s| s.name == candidate.name) {
                attempts.push(candidate);
            }
        }

        let mut last_err = CoreError::unavailable(kind.as_str());
        for selected in attempts {
            // Re-check after selection: a racing failure may have opened
            // this breaker between lookup and dispatch.
            if !selected.circuit.allow_call() {
                continue;
            }

            let outcome =
                tokio::time::timeout(self.timeout, op(selected.instance.clone())).await;
            match outcome {
                Err(_) => {
                    let err =
                        CoreError::timeout(action_type, self.timeout.as_millis() as u64);
                    self.record_provider_failure(&selected, kind.as_str(), handler).await;
                    tracing::warn!(
                        %kind, provider = %selected.name, action_type,
                        "provider call timed out, trying next candidate"
                    );
                    last_err = err;
                }
                Ok(Err(err)) => {
                    if err.counts_against_breaker() {
                        self.record_provider_failure(&selected, kind.as_str(), handler).await;
                    }
                    if err.is_retryable() {
                        tracing::warn!(
                            %kind, provider = %selected.name, action_type, error = %err,
                            "transient provider error, trying next candidate"
                        );
                        last_err = err;
                    } else {
                        self.resolve_failure(&correlation, &err).await;
                        return Err(err);
                    }
                }
                Ok(Ok(value)) => {
                    if let Some(transition) = selected.circuit.record_success() {
                        self.audit_breaker_transition(
                            kind.as_str(),
                            handler,
                            &transition.provider,
                            &transition.from.to_string(),
                            &transition.to.to_string(),
                        )
                        .await;
                    }
                    let response = serde_json::to_value(&value).unwrap_or(Value::Null);
                    if let Err(err) = self
                        .correlations
                        .complete(&correlation.correlation_id, response)
                        .await
                    {
                        tracing::warn!(error = %err, "failed to complete correlation");
                    }
                    if let Some(audit) = &self.audit {
                        audit
                            .log_event(
                                "bus.call",
                                AuditEventData::new(
                                    correlation.correlation_id.clone(),
                                    handler,
                                )
                                .with_action(action_type)
                                .with_resource(kind.as_str())
                                .with_metadata("provider", selected.name.clone()),
                            )
                            .await;
                    }
                    return Ok(value);
                }
            }
        }

        self.resolve_failure(&correlation, &last_err).await;
        Err(last_err)
    }

    async fn record_provider_failure<S: ?Sized>(
        &self,
        selected: &Selected<S>,
        kind: &str,
        handler: &str,
    ) {
        if let Some(transition) = selected.circuit.record_failure() {
            self.audit_breaker_transition(
                kind,
                handler,
                &transition.provider,
                &transition.from.to_string(),
                &transition.to.to_string(),
            )
            .await;
        }
    }

    async fn audit_breaker_transition(
        &self,
        kind: &str,
        handler: &str,
        provider: &str,
        from: &str,
        to: &str,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .log_event(
                    "circuit_breaker.transition",
                    AuditEventData::new(provider, handler)
                        .with_action("circuit_breaker_transition")
                        .with_resource(kind)
                        .with_severity(if to == "open" { "high" } else { "info" })
                        .with_metadata("from", from)
                        .with_metadata("to", to),
                )
                .await;
        }
    }

    async fn resolve_failure(&self, correlation: &Correlation, err: &CoreError) {
        if let Err(store_err) = self
            .correlations
            .fail(&correlation.correlation_id, &err.to_string())
            .await
        {
            tracing::warn!(error = %store_err, "failed to record correlation failure");
        }
        if let Some(audit) = &self.audit {
            audit
                .log_event(
                    "bus.call_failed",
                    AuditEventData::new(
                        correlation.correlation_id.clone(),
                        correlation.handler_name.clone(),
                    )
                        .with_action(correlation.action_type.clone())
                        .with_resource(correlation.service_kind.clone())
                        .with_outcome("failure")
                        .with_severity("warning")
                        .with_reason(err.to_string()),
                )
                .await;
        }
    }
}

/// Bus over the graph memory kind. Built without an audit sink; audit
/// storage itself rides this bus.
pub struct MemoryBus {
    registry: Arc<ServiceRegistry>,
    kernel: BusKernel,
}

impl MemoryBus {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        correlations: Arc<dyn CorrelationStore>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        let kernel = BusKernel::new(correlations, None, time, 10);
        Self { registry, kernel }
    }

    pub async fn memorize(&self, handler: &str, node: GraphNode) -> Result<MemoryOpResult> {
        if node.id.is_empty() {
            return Err(CoreError::Validation("graph node id is empty".into()));
        }
        let request = json!({"node_id": node.id, "scope": node.scope, "type": node.node_type});
        self.kernel
            .call(
                &self.registry.memory,
                handler,
                "memorize",
                &[],
                request,
                |svc| {
                    let node = node.clone();
                    async move { svc.memorize(node).await }
                },
            )
            .await
    }

    pub async fn recall(&self, handler: &str, query: MemoryQuery) -> Result<Vec<GraphNode>> {
        let request = json!({"node_id": query.node_id, "scope": query.scope});
        self.kernel
            .call(
                &self.registry.memory,
                handler,
                "recall",
                &[],
                request,
                |svc| {
                    let query = query.clone();
                    async move { svc.recall(query).await }
                },
            )
            .await
    }

    pub async fn forget(
        &self,
        handler: &str,
        node_id: &str,
        scope: GraphScope,
    ) -> Result<MemoryOpResult> {
        let request = json!({"node_id": node_id, "scope": scope});
        let node_id = node_id.to_string();
        self.kernel
            .call(
                &self.registry.memory,
                handler,
                "forget",
                &[],
                request,
                |svc| {
                    let node_id = node_id.clone();
                    async move { svc.forget(&node_id, scope).await }
                },
            )
            .await
    }

    pub async fn search(
        &self,
        handler: &str,
        query: &str,
        filters: Option<SearchFilter>,
    ) -> Result<Vec<GraphNode>> {
        let request = json!({"query": query});
        let query = query.to_string();
        self.kernel
            .call(
                &self.registry.memory,
                handler,
                "search",
                &[],
                request,
                |svc| {
                    let query = query.clone();
                    let filters = filters.clone();
                    async move { svc.search(&query, filters).await }
                },
            )
            .await
    }

    pub async fn recall_timeseries(
        &self,
        handler: &str,
        scope: GraphScope,
        hours: u32,
        correlation_types: Option<Vec<String>>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let request = json!({"scope": scope, "hours": hours});
        let handler_owned = handler.to_string();
        self.kernel
            .call(
                &self.registry.memory,
                handler,
                "recall_timeseries",
                &[],
                request,
                |svc| {
                    let correlation_types = correlation_types.clone();
                    let handler_owned = handler_owned.clone();
                    async move {
                        svc.recall_timeseries(scope, hours, correlation_types, &handler_owned)
                            .await
                    }
                },
            )
            .await
    }
}

/// Bus over the communication kind.
pub struct CommunicationBus {
    registry: Arc<ServiceRegistry>,
    kernel: BusKernel,
}

impl CommunicationBus {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        correlations: Arc<dyn CorrelationStore>,
        audit: Option<Arc<dyn AuditEventSink>>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        let kernel = BusKernel::new(correlations, audit, time, 15);
        Self { registry, kernel }
    }

    pub async fn send_message(
        &self,
        handler: &str,
        channel_id: &str,
        content: &str,
    ) -> Result<bool> {
        if channel_id.is_empty() {
            return Err(CoreError::Validation("channel id is empty".into()));
        }
        let request = json!({"channel_id": channel_id, "content_len": content.len()});
        let channel_id = channel_id.to_string();
        let content = content.to_string();
        self.kernel
            .call(
                &self.registry.communication,
                handler,
                "send_message",
                &["send_message"],
                request,
                |svc| {
                    let channel_id = channel_id.clone();
                    let content = content.clone();
                    async move { svc.send_message(&channel_id, &content).await }
                },
            )
            .await
    }

    pub async fn fetch_messages(
        &self,
        handler: &str,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<IncomingMessage>> {
        let request = json!({"channel_id": channel_id, "limit": limit});
        let channel_id = channel_id.to_string();
        self.kernel
            .call(
                &self.registry.communication,
                handler,
                "fetch_messages",
                &[],
                request,
                |svc| {
                    let channel_id = channel_id.clone();
                    async move { svc.fetch_messages(&channel_id, limit).await }
                },
            )
            .await
    }
}

/// Bus over the tool kind.
pub struct ToolBus {
    registry: Arc<ServiceRegistry>,
    kernel: BusKernel,
}

impl ToolBus {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        correlations: Arc<dyn CorrelationStore>,
        audit: Option<Arc<dyn AuditEventSink>>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        let kernel = BusKernel::new(correlations, audit, time, 30);
        Self { registry, kernel }
    }

    pub async fn execute_tool(
        &self,
        handler: &str,
        name: &str,
        params: Value,
    ) -> Result<ToolResult> {
        if name.is_empty() {
            return Err(CoreError::Validation("tool name is empty".into()));
        }
        let request = json!({"tool": name, "params": params});
        let name = name.to_string();
        self.kernel
            .call(
                &self.registry.tool,
                handler,
                "execute_tool",
                &[],
                request,
                |svc| {
                    let name = name.clone();
                    let params = params.clone();
                    async move { svc.execute_tool(&name, params).await }
                },
            )
            .await
    }

    pub async fn get_tool_result(
        &self,
        handler: &str,
        correlation_id: &str,
        timeout_secs: u64,
    ) -> Result<Option<ToolResult>> {
        let request = json!({"correlation_id": correlation_id, "timeout_secs": timeout_secs});
        let correlation_id = correlation_id.to_string();
        self.kernel
            .call(
                &self.registry.tool,
                handler,
                "get_tool_result",
                &[],
                request,
                |svc| {
                    let correlation_id = correlation_id.clone();
                    async move { svc.get_tool_result(&correlation_id, timeout_secs).await }
                },
            )
            .await
    }
}

/// Bus over the wise-authority kind.
pub struct WiseAuthorityBus {
    registry: Arc<ServiceRegistry>,
    kernel: BusKernel,
}

impl WiseAuthorityBus {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        correlations: Arc<dyn CorrelationStore>,
        audit: Option<Arc<dyn AuditEventSink>>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        let kernel = BusKernel::new(correlations, audit, time, 20);
        Self { registry, kernel }
    }

    pub async fn fetch_guidance(
        &self,
        handler: &str,
        context: GuidanceContext,
    ) -> Result<Option<String>> {
        if context.thought_id.is_empty() || context.task_id.is_empty() {
            return Err(CoreError::Validation(
                "guidance context requires thought_id and task_id".into(),
            ));
        }
        let request = serde_json::to_value(&context)?;
        self.kernel
            .call(
                &self.registry.wise_authority,
                handler,
                "fetch_guidance",
                &[],
                request,
                |svc| {
                    let context = context.clone();
                    async move { svc.fetch_guidance(context).await }
                },
            )
            .await
    }

    pub async fn submit_deferral(
        &self,
        handler: &str,
        context: DeferralContext,
    ) -> Result<bool> {
        if context.thought_id.is_empty() || context.task_id.is_empty() {
            return Err(CoreError::Validation(
                "deferral context requires thought_id and task_id".into(),
            ));
        }
        let request = serde_json::to_value(&context)?;
        self.kernel
            .call(
                &self.registry.wise_authority,
                handler,
                "submit_deferral",
                &[],
                request,
                |svc| {
                    let context = context.clone();
                    async move { svc.submit_deferral(context).await }
                },
            )
            .await
    }
}

/// Bus over the language-model kind.
pub struct LlmBus {
    registry: Arc<ServiceRegistry>,
    kernel: BusKernel,
}

impl LlmBus {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        correlations: Arc<dyn CorrelationStore>,
        audit: Option<Arc<dyn AuditEventSink>>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        let kernel = BusKernel::new(correlations, audit, time, 60);
        Self { registry, kernel }
    }

    pub async fn complete(&self, handler: &str, prompt: &str) -> Result<LlmCompletion> {
        if prompt.is_empty() {
            return Err(CoreError::Validation("prompt is empty".into()));
        }
        let request = json!({"prompt_len": prompt.len()});
        let prompt = prompt.to_string();
        self.kernel
            .call(
                &self.registry.llm,
                handler,
                "complete",
                &[],
                request,
                |svc| {
                    let prompt = prompt.clone();
                    async move { svc.complete(&prompt).await }
                },
            )
            .await
    }
}

/// All buses, constructed together over one registry.
pub struct BusManager {
    pub memory: Arc<MemoryBus>,
    pub communication: Arc<CommunicationBus>,
    pub tool: Arc<ToolBus>,
    pub wise_authority: Arc<WiseAuthorityBus>,
    pub llm: Arc<LlmBus>,
}

impl BusManager {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        correlations: Arc<dyn CorrelationStore>,
        audit: Option<Arc<dyn AuditEventSink>>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            memory: Arc::new(MemoryBus::new(
                registry.clone(),
                correlations.clone(),
                time.clone(),
            )),
            communication: Arc::new(CommunicationBus::new(
                registry.clone(),
                correlations.clone(),
                audit.clone(),
                time.clone(),
            )),
            tool: Arc::new(ToolBus::new(
                registry.clone(),
                correlations.clone(),
                audit.clone(),
                time.clone(),
            )),
            wise_authority: Arc::new(WiseAuthorityBus::new(
                registry.clone(),
                correlations.clone(),
                audit.clone(),
                time.clone(),
            )),
            llm: Arc::new(LlmBus::new(registry, correlations, audit, time)),
        }
    }
}
