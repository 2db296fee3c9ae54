//! Resource budget and snapshot schemas

use serde::{Deserialize, Serialize};

/// What the monitor does when a threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Log,
    Warn,
    Throttle,
    Defer,
    Reject,
    Shutdown,
}

impl ResourceAction {
    /// Signal name emitted on the resource signal bus for this action.
    pub fn signal(&self) -> Option<&'static str> {
        match self {
            ResourceAction::Log => None,
            ResourceAction::Warn => Some("warn"),
            ResourceAction::Throttle => Some("throttle"),
            ResourceAction::Defer => Some("defer"),
            ResourceAction::Reject => Some("reject"),
            ResourceAction::Shutdown => Some("shutdown"),
        }
    }
}

/// Thresholds for a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub warning: u64,
    pub critical: u64,
    pub limit: u64,
    pub action: ResourceAction,
    pub cooldown_seconds: u64,
}

impl ResourceLimit {
    pub fn new(warning: u64, critical: u64, limit: u64, action: ResourceAction) -> Self {
        Self {
            warning,
            critical,
            limit,
            action,
            cooldown_seconds: 60,
        }
    }
}

/// Budget across all monitored resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub memory_mb: ResourceLimit,
    pub cpu_percent: ResourceLimit,
    pub tokens_hour: ResourceLimit,
    pub tokens_day: ResourceLimit,
    pub thoughts_active: ResourceLimit,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            memory_mb: ResourceLimit::new(3072, 3840, 4096, ResourceAction::Defer),
            cpu_percent: ResourceLimit::new(60, 80, 100, ResourceAction::Throttle),
            tokens_hour: ResourceLimit::new(8000, 9500, 10000, ResourceAction::Defer),
            tokens_day: ResourceLimit::new(80000, 95000, 100000, ResourceAction::Reject),
            thoughts_active: ResourceLimit::new(40, 48, 50, ResourceAction::Defer),
        }
    }
}

/// Last-sampled usage, refreshed once per second.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub memory_mb: u64,
    pub memory_percent: u64,
    pub cpu_percent: u64,
    pub cpu_average_1m: u64,
    pub disk_free_mb: u64,
    pub disk_used_mb: u64,
    pub tokens_used_hour: u64,
    pub tokens_used_day: u64,
    pub thoughts_active: u64,
    pub healthy: bool,
    pub warnings: Vec<String>,
    pub critical: Vec<String>,
}

impl ResourceSnapshot {
    pub fn value_of(&self, resource: &str) -> Option<u64> {
        match resource {
            "memory_mb" => Some(self.memory_mb),
            "cpu_percent" => Some(self.cpu_average_1m),
            "tokens_hour" => Some(self.tokens_used_hour),
            "tokens_day" => Some(self.tokens_used_day),
            "thoughts_active" => Some(self.thoughts_active),
            _ => None,
        }
    }
}
