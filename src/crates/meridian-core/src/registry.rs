//! Typed multi-provider service registry
//!
//! Providers register under a service kind with a priority, a priority
//! group, a selection strategy, a capability set, and an optional handler
//! scope. Lookup walks priority groups in ascending order and returns the
//! first provider whose circuit is not open and whose capabilities cover the
//! request. Handler-scoped providers are consulted before global ones.
//!
//! Kinds have heterogeneous method sets, so each kind gets its own
//! [`ProviderRegistry`] parameterized over that kind's protocol trait;
//! [`ServiceRegistry`] aggregates them. The registry is process-scoped,
//! owned by the runtime, and passed explicitly; there are no globals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitTransition,
};
use crate::protocols::{
    AdaptiveFilterService, CommunicationService, LlmService, MemoryService, RuntimeService,
    SecretsService, ToolService, WiseAuthorityService,
};
use crate::time::TimeService;

/// The service kinds the runtime routes through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Communication,
    WiseAuthority,
    Tool,
    Memory,
    Audit,
    Llm,
    Telemetry,
    Config,
    RuntimeControl,
    Secrets,
    Time,
    Shutdown,
    Initialization,
    TaskScheduler,
    Authentication,
    ResourceMonitor,
    Visibility,
    AdaptiveFilter,
    SelfConfiguration,
    TsdbConsolidation,
    IncidentManagement,
    DatabaseMaintenance,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Communication => "communication",
            ServiceKind::WiseAuthority => "wise_authority",
            ServiceKind::Tool => "tool",
            ServiceKind::Memory => "memory",
            ServiceKind::Audit => "audit",
            ServiceKind::Llm => "llm",
            ServiceKind::Telemetry => "telemetry",
            ServiceKind::Config => "config",
            ServiceKind::RuntimeControl => "runtime_control",
            ServiceKind::Secrets => "secrets",
            ServiceKind::Time => "time",
            ServiceKind::Shutdown => "shutdown",
            ServiceKind::Initialization => "initialization",
            ServiceKind::TaskScheduler => "task_scheduler",
            ServiceKind::Authentication => "authentication",
            ServiceKind::ResourceMonitor => "resource_monitor",
            ServiceKind::Visibility => "visibility",
            ServiceKind::AdaptiveFilter => "adaptive_filter",
            ServiceKind::SelfConfiguration => "self_configuration",
            ServiceKind::TsdbConsolidation => "tsdb_consolidation",
            ServiceKind::IncidentManagement => "incident_management",
            ServiceKind::DatabaseMaintenance => "database_maintenance",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider priority within a priority group. Lower rank wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServicePriority {
    Critical,
    High,
    Normal,
    Low,
    Fallback,
}

impl ServicePriority {
    pub fn rank(&self) -> u8 {
        match self {
            ServicePriority::Critical => 0,
            ServicePriority::High => 1,
            ServicePriority::Normal => 2,
            ServicePriority::Low => 3,
            ServicePriority::Fallback => 9,
        }
    }
}

impl std::fmt::Display for ServicePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServicePriority::Critical => "critical",
            ServicePriority::High => "high",
            ServicePriority::Normal => "normal",
            ServicePriority::Low => "low",
            ServicePriority::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// How a provider is chosen within a priority group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// First eligible provider in priority order.
    Fallback,
    /// Rotate through eligible providers per (handler, kind) cursor.
    RoundRobin,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::Fallback => f.write_str("fallback"),
            SelectionStrategy::RoundRobin => f.write_str("round_robin"),
        }
    }
}

/// A provider registration under one service kind.
pub struct ProviderRegistration<S: ?Sized> {
    pub name: String,
    pub handler: Option<String>,
    pub priority: ServicePriority,
    pub priority_group: i32,
    pub strategy: SelectionStrategy,
    pub capabilities: HashSet<String>,
    pub instance: Arc<S>,
}

impl<S: ?Sized> ProviderRegistration<S> {
    pub fn new(name: impl Into<String>, instance: Arc<S>) -> Self {
        Self {
            name: name.into(),
            handler: None,
            priority: ServicePriority::Normal,
            priority_group: 0,
            strategy: SelectionStrategy::Fallback,
            capabilities: HashSet::new(),
            instance,
        }
    }

    /// Scope this provider to a specific calling handler.
    pub fn for_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn with_priority(mut self, priority: ServicePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_priority_group(mut self, group: i32) -> Self {
        self.priority_group = group;
        self
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_capabilities<I, T>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }
}

/// A provider chosen for one call, with its breaker handle for outcome
/// recording.
pub struct Selected<S: ?Sized> {
    pub name: String,
    pub instance: Arc<S>,
    pub circuit: Arc<CircuitBreaker>,
}

impl<S: ?Sized> Clone for Selected<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            instance: self.instance.clone(),
            circuit: self.circuit.clone(),
        }
    }
}

struct Entry<S: ?Sized> {
    registration: ProviderRegistration<S>,
    circuit: Arc<CircuitBreaker>,
    order: usize,
}

struct Inner<S: ?Sized> {
    entries: Vec<Entry<S>>,
    /// Round-robin cursors keyed by (handler scope, priority group).
    /// In-memory only; cursors do not survive a restart.
    cursors: HashMap<(String, i32), usize>,
    next_order: usize,
}

/// Registry of providers for one service kind.
pub struct ProviderRegistry<S: ?Sized> {
    kind: ServiceKind,
    time: Arc<dyn TimeService>,
    breaker_config: CircuitBreakerConfig,
    inner: RwLock<Inner<S>>,
}

impl<S: ?Sized> ProviderRegistry<S> {
    pub fn new(kind: ServiceKind, time: Arc<dyn TimeService>) -> Self {
        Self::with_breaker_config(kind, time, CircuitBreakerConfig::default())
    }

    pub fn with_breaker_config(
        kind: ServiceKind,
        time: Arc<dyn TimeService>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            kind,
            time,
            breaker_config,
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                cursors: HashMap::new(),
                next_order: 0,
            }),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Register a provider. Replaces any existing provider with the same
    /// name and handler scope.
    pub fn register(&self, registration: ProviderRegistration<S>) {
        let circuit = Arc::new(CircuitBreaker::new(
            format!("{}/{}", self.kind, registration.name),
            self.breaker_config.clone(),
            self.time.clone(),
        ));
        let mut inner = self.inner.write();
        inner.entries.retain(|e| {
            e.registration.name != registration.name
                || e.registration.handler != registration.handler
        });
        let order = inner.next_order;
        inner.next_order += 1;
        tracing::debug!(
            kind = %self.kind,
            provider = %registration.name,
            handler = ?registration.handler,
            priority = %registration.priority,
            group = registration.priority_group,
            "registered provider"
        );
        inner.entries.push(Entry {
            registration,
            circuit,
            order,
        });
    }

    /// Remove a provider by name (all handler scopes). Returns whether
    /// anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.registration.name != name);
        before != inner.entries.len()
    }

    pub fn provider_count(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Update a provider's priority and group. Takes effect immediately.
    pub fn set_priority(&self, name: &str, priority: ServicePriority, group: i32) -> bool {
        let mut inner = self.inner.write();
        let mut updated = false;
        for entry in inner.entries.iter_mut() {
            if entry.registration.name == name {
                entry.registration.priority = priority;
                entry.registration.priority_group = group;
                updated = true;
            }
        }
        updated
    }

    /// Update a provider's selection strategy. Takes effect immediately.
    pub fn set_strategy(&self, name: &str, strategy: SelectionStrategy) -> bool {
        let mut inner = self.inner.write();
        let mut updated = false;
        for entry in inner.entries.iter_mut() {
            if entry.registration.name == name {
                entry.registration.strategy = strategy;
                updated = true;
            }
        }
        updated
    }

    /// Select one provider for a call. Handler-scoped providers are tried
    /// first, then global ones.
    pub fn select(&self, handler: Option<&str>, required: &[&str]) -> Option<Selected<S>> {
        let mut inner = self.inner.write();
        if let Some(h) = handler {
            if let Some(selected) = Self::pick_in_scope(&mut inner, Some(h), required) {
                return Some(selected);
            }
        }
        Self::pick_in_scope(&mut inner, None, required)
    }

    /// All eligible providers in selection order, for fallback iteration.
    pub fn candidates(&self, handler: Option<&str>, required: &[&str]) -> Vec<Selected<S>> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        if let Some(h) = handler {
            out.extend(Self::ordered_in_scope(&inner, Some(h), required));
        }
        out.extend(Self::ordered_in_scope(&inner, None, required));
        out
    }

    /// Force every breaker in this registry back to closed.
    pub fn reset_circuit_breakers(&self) -> Vec<CircuitTransition> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter_map(|e| e.circuit.reset())
            .collect()
    }

    /// Selection explanation for operations tooling.
    pub fn describe(&self) -> RegistryDescription {
        let inner = self.inner.read();
        let mut groups: HashMap<i32, Vec<&Entry<S>>> = HashMap::new();
        for entry in &inner.entries {
            groups
                .entry(entry.registration.priority_group)
                .or_default()
                .push(entry);
        }
        let mut group_ids: Vec<i32> = groups.keys().copied().collect();
        group_ids.sort_unstable();

        let groups = group_ids
            .into_iter()
            .map(|group| {
                let mut members = groups.remove(&group).unwrap_or_default();
                members.sort_by_key(|e| (e.registration.priority.rank(), e.order));
                let strategy = members
                    .first()
                    .map(|e| e.registration.strategy)
                    .unwrap_or(SelectionStrategy::Fallback);
                GroupDescription {
                    group,
                    strategy,
                    providers: members
                        .iter()
                        .map(|e| ProviderDescription {
                            name: e.registration.name.clone(),
                            handler: e.registration.handler.clone(),
                            priority: e.registration.priority,
                            priority_group: e.registration.priority_group,
                            strategy: e.registration.strategy,
                            capabilities: {
                                let mut caps: Vec<String> =
                                    e.registration.capabilities.iter().cloned().collect();
                                caps.sort();
                                caps
                            },
                            circuit_state: e.circuit.state().to_string(),
                        })
                        .collect(),
                }
            })
            .collect();

        RegistryDescription {
            kind: self.kind.to_string(),
            overview: format!(
                "{} provider(s) registered for '{}'; lookups walk priority \
                 groups in ascending order and return the first provider whose \
                 circuit is not open and whose capabilities cover the request",
                inner.entries.len(),
                self.kind
            ),
            groups,
            selection_semantics: "FALLBACK picks by priority order \
                 (critical < high < normal < low < fallback); ROUND_ROBIN \
                 rotates a per-(handler, kind) cursor over the group"
                .to_string(),
            circuit_semantics: "closed admits calls; open refuses until the \
                 cooldown elapses; half-open admits one probe whose outcome \
                 closes or re-opens the circuit"
                .to_string(),
        }
    }

    fn eligible(entry: &Entry<S>, required: &[&str]) -> bool {
        required
            .iter()
            .all(|cap| entry.registration.capabilities.contains(*cap))
            && entry.circuit.allow_call()
    }

    fn pick_in_scope(
        inner: &mut Inner<S>,
        scope: Option<&str>,
        required: &[&str],
    ) -> Option<Selected<S>> {
        let group = {
            let eligible: Vec<&Entry<S>> = inner
                .entries
                .iter()
                .filter(|e| e.registration.handler.as_deref() == scope)
                .filter(|e| Self::eligible(e, required))
                .collect();
            eligible
                .iter()
                .map(|e| e.registration.priority_group)
                .min()?
        };

        let mut members: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.registration.handler.as_deref() == scope
                    && e.registration.priority_group == group
                    && Self::eligible(e, required)
            })
            .map(|(i, _)| i)
            .collect();
        members.sort_by_key(|&i| {
            let e = &inner.entries[i];
            (e.registration.priority.rank(), e.order)
        });

        let strategy = inner.entries[members[0]].registration.strategy;
        let chosen = match strategy {
            SelectionStrategy::Fallback => members[0],
            SelectionStrategy::RoundRobin => {
                let key = (scope.unwrap_or("__global__").to_string(), group);
                let cursor = inner.cursors.entry(key).or_insert(0);
                let idx = members[*cursor % members.len()];
                *cursor = cursor.wrapping_add(1);
                idx
            }
        };

        let entry = &inner.entries[chosen];
        Some(Selected {
            name: entry.registration.name.clone(),
            instance: entry.registration.instance.clone(),
            circuit: entry.circuit.clone(),
        })
    }

    fn ordered_in_scope(
        inner: &Inner<S>,
        scope: Option<&str>,
        required: &[&str],
    ) -> Vec<Selected<S>> {
        let mut eligible: Vec<&Entry<S>> = inner
            .entries
            .iter()
            .filter(|e| e.registration.handler.as_deref() == scope)
            .filter(|e| Self::eligible(e, required))
            .collect();
        eligible.sort_by_key(|e| {
            (
                e.registration.priority_group,
                e.registration.priority.rank(),
                e.order,
            )
        });
        eligible
            .into_iter()
            .map(|e| Selected {
                name: e.registration.name.clone(),
                instance: e.registration.instance.clone(),
                circuit: e.circuit.clone(),
            })
            .collect()
    }
}

/// Description of one provider for operations tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescription {
    pub name: String,
    pub handler: Option<String>,
    pub priority: ServicePriority,
    pub priority_group: i32,
    pub strategy: SelectionStrategy,
    pub capabilities: Vec<String>,
    pub circuit_state: String,
}

/// One priority group in a registry description.
#[derive(Debug, Clone, Serialize)]
pub struct GroupDescription {
    pub group: i32,
    pub strategy: SelectionStrategy,
    pub providers: Vec<ProviderDescription>,
}

/// Selection explanation returned by the describe operation.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryDescription {
    pub kind: String,
    pub overview: String,
    pub groups: Vec<GroupDescription>,
    pub selection_semantics: String,
    pub circuit_semantics: String,
}

/// Aggregate registry over all service kinds. Kinds with operations used by
/// the core get typed sub-registries; the rest register under the narrow
/// base protocol.
pub struct ServiceRegistry {
    pub communication: ProviderRegistry<dyn CommunicationService>,
    pub wise_authority: ProviderRegistry<dyn WiseAuthorityService>,
    pub tool: ProviderRegistry<dyn ToolService>,
    pub memory: ProviderRegistry<dyn MemoryService>,
    pub llm: ProviderRegistry<dyn LlmService>,
    pub adaptive_filter: ProviderRegistry<dyn AdaptiveFilterService>,
    pub secrets: ProviderRegistry<dyn SecretsService>,
    generic: RwLock<HashMap<ServiceKind, Arc<ProviderRegistry<dyn RuntimeService>>>>,
    time: Arc<dyn TimeService>,
}

impl ServiceRegistry {
    pub fn new(time: Arc<dyn TimeService>) -> Self {
        Self {
            communication: ProviderRegistry::new(ServiceKind::Communication, time.clone()),
            wise_authority: ProviderRegistry::new(ServiceKind::WiseAuthority, time.clone()),
            tool: ProviderRegistry::new(ServiceKind::Tool, time.clone()),
            memory: ProviderRegistry::new(ServiceKind::Memory, time.clone()),
            llm: ProviderRegistry::new(ServiceKind::Llm, time.clone()),
            adaptive_filter: ProviderRegistry::new(ServiceKind::AdaptiveFilter, time.clone()),
            secrets: ProviderRegistry::new(ServiceKind::Secrets, time.clone()),
            generic: RwLock::new(HashMap::new()),
            time,
        }
    }

    /// Registry for a kind without a dedicated operation surface.
    pub fn generic(&self, kind: ServiceKind) -> Arc<ProviderRegistry<dyn RuntimeService>> {
        let mut map = self.generic.write();
        map.entry(kind)
            .or_insert_with(|| Arc::new(ProviderRegistry::new(kind, self.time.clone())))
            .clone()
    }

    /// Force breakers back to closed for one kind, or all kinds.
    pub fn reset_circuit_breakers(&self, kind: Option<ServiceKind>) -> Vec<CircuitTransition> {
        let mut transitions = Vec::new();
        let reset_kind = |k: ServiceKind, out: &mut Vec<CircuitTransition>| match k {
            ServiceKind::Communication => out.extend(self.communication.reset_circuit_breakers()),
            ServiceKind::WiseAuthority => out.extend(self.wise_authority.reset_circuit_breakers()),
            ServiceKind::Tool => out.extend(self.tool.reset_circuit_breakers()),
            ServiceKind::Memory => out.extend(self.memory.reset_circuit_breakers()),
            ServiceKind::Llm => out.extend(self.llm.reset_circuit_breakers()),
            ServiceKind::AdaptiveFilter => {
                out.extend(self.adaptive_filter.reset_circuit_breakers())
            }
            ServiceKind::Secrets => out.extend(self.secrets.reset_circuit_breakers()),
            other => {
                let map = self.generic.read();
                if let Some(registry) = map.get(&other) {
                    out.extend(registry.reset_circuit_breakers());
                }
            }
        };

        match kind {
            Some(k) => reset_kind(k, &mut transitions),
            None => {
                for k in [
                    ServiceKind::Communication,
                    ServiceKind::WiseAuthority,
                    ServiceKind::Tool,
                    ServiceKind::Memory,
                    ServiceKind::Llm,
                    ServiceKind::AdaptiveFilter,
                    ServiceKind::Secrets,
                ] {
                    reset_kind(k, &mut transitions);
                }
                let generic_kinds: Vec<ServiceKind> =
                    self.generic.read().keys().copied().collect();
                for k in generic_kinds {
                    reset_kind(k, &mut transitions);
                }
            }
        }
        transitions
    }

    /// Selection explanations for every kind with registered providers.
    pub fn describe(&self) -> Vec<RegistryDescription> {
        let mut out = vec![
            self.communication.describe(),
            self.wise_authority.describe(),
            self.tool.describe(),
            self.memory.describe(),
            self.llm.describe(),
            self.adaptive_filter.describe(),
            self.secrets.describe(),
        ];
        for registry in self.generic.read().values() {
            out.push(registry.describe());
        }
        out.retain(|d| !d.groups.is_empty());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualTimeService;
    use async_trait::async_trait;

    struct StubTool {
        name: &'static str,
    }

    #[async_trait]
    impl RuntimeService for StubTool {}

    #[async_trait]
    impl ToolService for StubTool {
        async fn execute_tool(
            &self,
            _name: &str,
            _params: serde_json::Value,
        ) -> crate::error::Result<crate::schemas::ToolResult> {
            Ok(crate::schemas::ToolResult::success(
                self.name,
                serde_json::Value::Null,
                "corr",
            ))
        }

        async fn get_tool_result(
            &self,
            _correlation_id: &str,
            _timeout_secs: u64,
        ) -> crate::error::Result<Option<crate::schemas::ToolResult>> {
            Ok(None)
        }

        fn available_tools(&self) -> Vec<String> {
            vec![self.name.to_string()]
        }
    }

    fn registry(time: Arc<ManualTimeService>) -> ProviderRegistry<dyn ToolService> {
        ProviderRegistry::new(ServiceKind::Tool, time)
    }

    fn tool(name: &'static str) -> Arc<dyn ToolService> {
        Arc::new(StubTool { name })
    }

    #[test]
    fn test_priority_order_within_group() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("low", tool("low")).with_priority(ServicePriority::Low),
        );
        reg.register(
            ProviderRegistration::new("high", tool("high")).with_priority(ServicePriority::High),
        );

        let selected = reg.select(None, &[]).unwrap();
        assert_eq!(selected.name, "high");
    }

    #[test]
    fn test_lower_group_wins_over_priority() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("critical-g1", tool("a"))
                .with_priority(ServicePriority::Critical)
                .with_priority_group(1),
        );
        reg.register(
            ProviderRegistration::new("low-g0", tool("b"))
                .with_priority(ServicePriority::Low)
                .with_priority_group(0),
        );

        assert_eq!(reg.select(None, &[]).unwrap().name, "low-g0");
    }

    #[test]
    fn test_capability_filter() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("plain", tool("plain"))
                .with_priority(ServicePriority::High),
        );
        reg.register(
            ProviderRegistration::new("capable", tool("capable"))
                .with_priority(ServicePriority::Low)
                .with_capability("execute_tool"),
        );

        assert_eq!(
            reg.select(None, &["execute_tool"]).unwrap().name,
            "capable"
        );
        assert!(reg.select(None, &["missing_cap"]).is_none());
    }

    #[test]
    fn test_open_circuit_skipped() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("primary", tool("primary"))
                .with_priority(ServicePriority::High),
        );
        reg.register(
            ProviderRegistration::new("backup", tool("backup"))
                .with_priority(ServicePriority::Normal),
        );

        let primary = reg.select(None, &[]).unwrap();
        assert_eq!(primary.name, "primary");
        for _ in 0..5 {
            primary.circuit.record_failure();
        }

        assert_eq!(reg.select(None, &[]).unwrap().name, "backup");
    }

    #[test]
    fn test_handler_scope_preferred() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(ProviderRegistration::new("global", tool("global")));
        reg.register(
            ProviderRegistration::new("scoped", tool("scoped")).for_handler("observer"),
        );

        assert_eq!(reg.select(Some("observer"), &[]).unwrap().name, "scoped");
        assert_eq!(reg.select(Some("other"), &[]).unwrap().name, "global");
        assert_eq!(reg.select(None, &[]).unwrap().name, "global");
    }

    #[test]
    fn test_round_robin_rotates() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("a", tool("a"))
                .with_strategy(SelectionStrategy::RoundRobin),
        );
        reg.register(
            ProviderRegistration::new("b", tool("b"))
                .with_strategy(SelectionStrategy::RoundRobin),
        );

        let first = reg.select(None, &[]).unwrap().name;
        let second = reg.select(None, &[]).unwrap().name;
        let third = reg.select(None, &[]).unwrap().name;
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_candidates_order() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("g1-high", tool("x"))
                .with_priority(ServicePriority::High)
                .with_priority_group(1),
        );
        reg.register(
            ProviderRegistration::new("g0-low", tool("y"))
                .with_priority(ServicePriority::Low)
                .with_priority_group(0),
        );
        reg.register(
            ProviderRegistration::new("g0-high", tool("z"))
                .with_priority(ServicePriority::High)
                .with_priority_group(0),
        );

        let names: Vec<String> = reg
            .candidates(None, &[])
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["g0-high", "g0-low", "g1-high"]);
    }

    #[test]
    fn test_set_priority_effective_immediately() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(
            ProviderRegistration::new("a", tool("a")).with_priority(ServicePriority::Normal),
        );
        reg.register(
            ProviderRegistration::new("b", tool("b")).with_priority(ServicePriority::Low),
        );

        assert_eq!(reg.select(None, &[]).unwrap().name, "a");
        assert!(reg.set_priority("b", ServicePriority::Critical, 0));
        assert_eq!(reg.select(None, &[]).unwrap().name, "b");
    }

    #[test]
    fn test_set_strategy_effective_immediately() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(ProviderRegistration::new("a", tool("a")));
        reg.register(ProviderRegistration::new("b", tool("b")));

        // Fallback keeps returning the first registration.
        assert_eq!(reg.select(None, &[]).unwrap().name, "a");
        assert_eq!(reg.select(None, &[]).unwrap().name, "a");

        assert!(reg.set_strategy("a", SelectionStrategy::RoundRobin));
        assert!(reg.set_strategy("b", SelectionStrategy::RoundRobin));
        let first = reg.select(None, &[]).unwrap().name;
        let second = reg.select(None, &[]).unwrap().name;
        assert_ne!(first, second);
    }

    #[test]
    fn test_reset_circuit_breakers() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(ProviderRegistration::new("only", tool("only")));
        let selected = reg.select(None, &[]).unwrap();
        for _ in 0..5 {
            selected.circuit.record_failure();
        }
        assert!(reg.select(None, &[]).is_none());

        let transitions = reg.reset_circuit_breakers();
        assert_eq!(transitions.len(), 1);
        assert!(reg.select(None, &[]).is_some());
    }

    #[test]
    fn test_describe_groups_sorted() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(ProviderRegistration::new("b", tool("b")).with_priority_group(2));
        reg.register(ProviderRegistration::new("a", tool("a")).with_priority_group(0));

        let description = reg.describe();
        assert_eq!(description.kind, "tool");
        let groups: Vec<i32> = description.groups.iter().map(|g| g.group).collect();
        assert_eq!(groups, vec![0, 2]);
    }

    #[test]
    fn test_unregister() {
        let time = Arc::new(ManualTimeService::new());
        let reg = registry(time);
        reg.register(ProviderRegistration::new("a", tool("a")));
        assert!(reg.unregister("a"));
        assert!(!reg.unregister("a"));
        assert!(reg.select(None, &[]).is_none());
    }

    #[test]
    fn test_service_registry_generic_kinds() {
        let time: Arc<dyn TimeService> = Arc::new(ManualTimeService::new());
        let registry = ServiceRegistry::new(time);

        struct Plain;
        #[async_trait]
        impl RuntimeService for Plain {}

        let telemetry = registry.generic(ServiceKind::Telemetry);
        telemetry.register(ProviderRegistration::new(
            "collector",
            Arc::new(Plain) as Arc<dyn RuntimeService>,
        ));
        assert_eq!(telemetry.provider_count(), 1);
        // Same Arc comes back on the next call.
        assert_eq!(
            registry.generic(ServiceKind::Telemetry).provider_count(),
            1
        );

        let descriptions = registry.describe();
        assert_eq!(descriptions.len(), 1);
        assert_eq!(descriptions[0].kind, "telemetry");
    }
}
