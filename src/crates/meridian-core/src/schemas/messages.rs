//! Inbound message and adaptive-filter schemas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message arriving from an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Adapter-assigned message id; observers deduplicate on it.
    pub message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub channel_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set by adapters that can distinguish bot senders.
    #[serde(default)]
    pub is_bot: bool,
    /// Id of the message this one replies to, when the adapter knows it.
    /// Used to correlate wise-authority feedback with deferral reports.
    #[serde(default)]
    pub reference_message_id: Option<String>,
}

impl IncomingMessage {
    pub fn new(
        message_id: impl Into<String>,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            author_id: author_id.into(),
            author_name: author_name.into(),
            channel_id: channel_id.into(),
            content: content.into(),
            timestamp,
            is_bot: false,
            reference_message_id: None,
        }
    }
}

/// Priority assigned by the adaptive filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl FilterPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterPriority::Low => "low",
            FilterPriority::Normal => "normal",
            FilterPriority::High => "high",
            FilterPriority::Critical => "critical",
        }
    }

    /// Whether this priority takes the immediate-observation path.
    pub fn is_urgent(&self) -> bool {
        matches!(self, FilterPriority::High | FilterPriority::Critical)
    }

    /// Numeric task priority seeded from the filter verdict.
    pub fn task_priority(&self) -> i64 {
        match self {
            FilterPriority::Low => 0,
            FilterPriority::Normal => 1,
            FilterPriority::High => 5,
            FilterPriority::Critical => 10,
        }
    }
}

impl std::fmt::Display for FilterPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict returned by the adaptive filter for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub should_process: bool,
    pub priority: FilterPriority,
    pub reasoning: String,
    #[serde(default)]
    pub context_hints: Vec<String>,
}

impl FilterVerdict {
    pub fn accept(priority: FilterPriority, reasoning: impl Into<String>) -> Self {
        Self {
            should_process: true,
            priority,
            reasoning: reasoning.into(),
            context_hints: Vec::new(),
        }
    }

    pub fn drop(reasoning: impl Into<String>) -> Self {
        Self {
            should_process: false,
            priority: FilterPriority::Low,
            reasoning: reasoning.into(),
            context_hints: Vec::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.context_hints.push(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(FilterPriority::Critical > FilterPriority::High);
        assert!(FilterPriority::High > FilterPriority::Normal);
        assert!(FilterPriority::Normal > FilterPriority::Low);
    }

    #[test]
    fn test_urgency() {
        assert!(FilterPriority::Critical.is_urgent());
        assert!(FilterPriority::High.is_urgent());
        assert!(!FilterPriority::Normal.is_urgent());
    }

    #[test]
    fn test_verdict_constructors() {
        let verdict = FilterVerdict::accept(FilterPriority::High, "direct question")
            .with_hint("mentions_agent");
        assert!(verdict.should_process);
        assert_eq!(verdict.context_hints, vec!["mentions_agent".to_string()]);

        let dropped = FilterVerdict::drop("duplicate message");
        assert!(!dropped.should_process);
    }
}
