//! Default adaptive filter provider
//!
//! A heuristic implementation of the adaptive-filter protocol used when no
//! richer filter is registered: drops empty and recently-duplicated
//! content, escalates direct mentions and urgent phrasing, and keeps
//! everything else at normal priority.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use meridian_core::error::Result;
use meridian_core::protocols::{AdaptiveFilterService, RuntimeService};
use meridian_core::schemas::{FilterPriority, FilterVerdict, IncomingMessage};

const DUPLICATE_WINDOW: usize = 32;

/// Heuristic message filter.
pub struct HeuristicFilter {
    agent_name: String,
    recent_content: Mutex<VecDeque<String>>,
}

impl HeuristicFilter {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into().to_lowercase(),
            recent_content: Mutex::new(VecDeque::with_capacity(DUPLICATE_WINDOW)),
        }
    }

    fn is_recent_duplicate(&self, content: &str) -> bool {
        let mut recent = self.recent_content.lock();
        if recent.iter().any(|c| c == content) {
            return true;
        }
        if recent.len() == DUPLICATE_WINDOW {
            recent.pop_front();
        }
        recent.push_back(content.to_string());
        false
    }
}

#[async_trait]
impl RuntimeService for HeuristicFilter {
    fn capabilities(&self) -> Vec<String> {
        vec!["evaluate".to_string()]
    }
}

#[async_trait]
impl AdaptiveFilterService for HeuristicFilter {
    async fn evaluate(&self, message: &IncomingMessage, origin: &str) -> Result<FilterVerdict> {
        let content = message.content.trim();
        if content.is_empty() {
            return Ok(FilterVerdict::drop("empty message"));
        }
        if self.is_recent_duplicate(content) {
            return Ok(FilterVerdict::drop("duplicate of recent message"));
        }

        let lowered = content.to_lowercase();
        if lowered.contains("urgent")
            || lowered.contains("emergency")
            || lowered.contains("help!")
        {
            return Ok(FilterVerdict::accept(
                FilterPriority::Critical,
                "urgent phrasing detected",
            )
            .with_hint("urgent_language"));
        }
        if !self.agent_name.is_empty() && lowered.contains(&self.agent_name) {
            return Ok(FilterVerdict::accept(
                FilterPriority::High,
                "agent mentioned by name",
            )
            .with_hint("direct_mention"));
        }
        if content.ends_with('?') {
            return Ok(FilterVerdict::accept(
                FilterPriority::High,
                "direct question",
            ));
        }

        Ok(FilterVerdict::accept(
            FilterPriority::Normal,
            format!("default priority for {origin} traffic"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(content: &str) -> IncomingMessage {
        IncomingMessage::new("m1", "u1", "User", "c1", content, Utc::now())
    }

    #[tokio::test]
    async fn test_empty_dropped() {
        let filter = HeuristicFilter::new("meridian");
        let verdict = filter.evaluate(&msg("   "), "cli").await.unwrap();
        assert!(!verdict.should_process);
    }

    #[tokio::test]
    async fn test_duplicate_dropped() {
        let filter = HeuristicFilter::new("meridian");
        assert!(filter.evaluate(&msg("hello"), "cli").await.unwrap().should_process);
        assert!(!filter.evaluate(&msg("hello"), "cli").await.unwrap().should_process);
    }

    #[tokio::test]
    async fn test_urgent_is_critical() {
        let filter = HeuristicFilter::new("meridian");
        let verdict = filter
            .evaluate(&msg("URGENT: the deploy is failing"), "cli")
            .await
            .unwrap();
        assert_eq!(verdict.priority, FilterPriority::Critical);
    }

    #[tokio::test]
    async fn test_mention_is_high() {
        let filter = HeuristicFilter::new("meridian");
        let verdict = filter
            .evaluate(&msg("meridian, what do you think"), "cli")
            .await
            .unwrap();
        assert_eq!(verdict.priority, FilterPriority::High);
        assert!(verdict.context_hints.contains(&"direct_mention".to_string()));
    }

    #[tokio::test]
    async fn test_default_is_normal() {
        let filter = HeuristicFilter::new("meridian");
        let verdict = filter.evaluate(&msg("nice weather"), "cli").await.unwrap();
        assert_eq!(verdict.priority, FilterPriority::Normal);
    }
}
