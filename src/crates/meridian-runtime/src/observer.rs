//! Adaptive ingress observer
//!
//! One observer per adapter. Every inbound message runs the same pipeline:
//! own/bot messages go to history only; content passes through the secrets
//! pipeline; the adaptive filter decides drop vs priority; wise-authority
//! replies on the deferral channel become feedback; everything else becomes
//! a task with a seed thought. Errors are isolated per message, and
//! duplicate message ids are ignored.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use meridian_core::buses::AuditEventSink;
use meridian_core::protocols::{AdaptiveFilterService, SecretsService};
use meridian_core::schemas::{
    AuditEventData, FilterPriority, FilterVerdict, GraphScope, IncomingMessage, MemoryQuery,
    ThoughtType,
};
use meridian_core::time::TimeService;
use meridian_core::{MemoryBus, ServiceRegistry};

use crate::db::models::{ProcessingContext, TaskRow, ThoughtRow};
use crate::db::repositories::{TaskRepository, ThoughtRepository};
use crate::sinks::{FeedbackItem, FeedbackSink};

/// Ring-buffered history depth for passive context.
pub const PASSIVE_CONTEXT_LIMIT: usize = 10;

const DEDUPE_WINDOW: usize = 256;

/// Static observer configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Adapter kind this observer ingests from (e.g., "cli", "chat").
    pub origin: String,
    /// The agent's own author id; its messages never re-enter the pipeline.
    pub agent_id: String,
    /// Channel carrying deferral reports and wise-authority replies.
    pub deferral_channel_id: Option<String>,
    /// Author names recognized as wise authorities.
    pub wa_authors: HashSet<String>,
}

impl ObserverConfig {
    pub fn new(origin: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            agent_id: agent_id.into(),
            deferral_channel_id: None,
            wa_authors: HashSet::new(),
        }
    }

    pub fn with_deferral_channel(
        mut self,
        channel_id: impl Into<String>,
        wa_authors: impl IntoIterator<Item = String>,
    ) -> Self {
        self.deferral_channel_id = Some(channel_id.into());
        self.wa_authors.extend(wa_authors);
        self
    }
}

/// What the pipeline did with one message, for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// Duplicate message id; nothing done.
    Duplicate,
    /// The agent's own (or a bot's) message; history only.
    AgentMessage,
    /// Dropped by the adaptive filter.
    Dropped { reasoning: String },
    /// Routed to the feedback sink as a wise-authority correction.
    Feedback,
    /// Task and seed thought created.
    Observation {
        task_id: String,
        thought_id: String,
        priority: FilterPriority,
    },
}

/// Per-adapter incoming-message handler.
pub struct Observer {
    config: ObserverConfig,
    handler_name: String,
    registry: Arc<ServiceRegistry>,
    secrets: Arc<dyn SecretsService>,
    memory_bus: Arc<MemoryBus>,
    audit: Arc<dyn AuditEventSink>,
    feedback: Arc<FeedbackSink>,
    pool: SqlitePool,
    time: Arc<dyn TimeService>,
    history: Mutex<VecDeque<IncomingMessage>>,
    seen: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl Observer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ObserverConfig,
        registry: Arc<ServiceRegistry>,
        secrets: Arc<dyn SecretsService>,
        memory_bus: Arc<MemoryBus>,
        audit: Arc<dyn AuditEventSink>,
        feedback: Arc<FeedbackSink>,
        pool: SqlitePool,
        time: Arc<dyn TimeService>,
    ) -> Self {
        let handler_name = format!("observer:{}", config.origin);
        Self {
            config,
            handler_name,
            registry,
            secrets,
            memory_bus,
            audit,
            feedback,
            pool,
            time,
            history: Mutex::new(VecDeque::with_capacity(PASSIVE_CONTEXT_LIMIT)),
            seen: Mutex::new((HashSet::new(), VecDeque::with_capacity(DEDUPE_WINDOW))),
        }
    }

    /// Recent processed messages, oldest first.
    pub async fn history(&self) -> Vec<IncomingMessage> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Run the ingress pipeline for one message.
    pub async fn handle_incoming_message(
        &self,
        message: IncomingMessage,
    ) -> crate::Result<ObservationOutcome> {
        if self.already_seen(&message.message_id).await {
            return Ok(ObservationOutcome::Duplicate);
        }

        if message.author_id == self.config.agent_id || message.is_bot {
            self.push_history(message).await;
            return Ok(ObservationOutcome::AgentMessage);
        }

        let (message, secret_refs) = self.process_secrets(message).await;
        self.push_history(message.clone()).await;

        let verdict = self.apply_filter(&message).await;
        if !verdict.should_process {
            tracing::debug!(
                message_id = %message.message_id,
                reasoning = %verdict.reasoning,
                "message filtered out"
            );
            return Ok(ObservationOutcome::Dropped {
                reasoning: verdict.reasoning,
            });
        }

        if self.is_wa_feedback(&message) {
            if let Some(deferred_thought_id) = message.reference_message_id.clone() {
                let queued = self
                    .feedback
                    .enqueue(FeedbackItem {
                        message: message.clone(),
                        deferred_thought_id,
                    })
                    .await;
                if queued {
                    self.recall_context(&message).await;
                    return Ok(ObservationOutcome::Feedback);
                }
                tracing::warn!(
                    message_id = %message.message_id,
                    "feedback sink full; handling WA reply as observation"
                );
            } else {
                tracing::warn!(
                    message_id = %message.message_id,
                    "WA reply without a referenced deferral; handling as observation"
                );
            }
        }

        let outcome = self
            .create_observation(&message, &verdict, secret_refs)
            .await?;
        self.recall_context(&message).await;
        Ok(outcome)
    }

    async fn already_seen(&self, message_id: &str) -> bool {
        let mut seen = self.seen.lock().await;
        if seen.0.contains(message_id) {
            return true;
        }
        if seen.1.len() == DEDUPE_WINDOW {
            if let Some(evicted) = seen.1.pop_front() {
                seen.0.remove(&evicted);
            }
        }
        seen.0.insert(message_id.to_string());
        seen.1.push_back(message_id.to_string());
        false
    }

    async fn push_history(&self, message: IncomingMessage) {
        let mut history = self.history.lock().await;
        if history.len() == PASSIVE_CONTEXT_LIMIT {
            history.pop_front();
        }
        history.push_back(message);
    }

    /// Replace detected secrets with opaque references. A secrets failure
    /// keeps the original content rather than dropping the message.
    async fn process_secrets(
        &self,
        mut message: IncomingMessage,
    ) -> (IncomingMessage, Vec<String>) {
        match self
            .secrets
            .process_incoming_text(&message.content, &message.message_id)
            .await
        {
            Ok((cleaned, refs)) => {
                message.content = cleaned;
                let refs = refs.into_iter().map(|r| r.secret_ref).collect();
                (message, refs)
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.message_id,
                    error = %e,
                    "secrets processing failed; continuing with raw content"
                );
                (message, Vec::new())
            }
        }
    }

    /// Consult the adaptive filter through the registry. With no filter
    /// provider the message passes at normal priority.
    async fn apply_filter(&self, message: &IncomingMessage) -> FilterVerdict {
        let Some(selected) = self
            .registry
            .adaptive_filter
            .select(Some(&self.handler_name), &[])
        else {
            return FilterVerdict::accept(
                FilterPriority::Normal,
                "no adaptive filter registered",
            );
        };

        match selected
            .instance
            .evaluate(message, &self.config.origin)
            .await
        {
            Ok(verdict) => {
                selected.circuit.record_success();
                verdict
            }
            Err(e) => {
                selected.circuit.record_failure();
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "adaptive filter failed; passing message at normal priority"
                );
                FilterVerdict::accept(FilterPriority::Normal, "filter error")
            }
        }
    }

    fn is_wa_feedback(&self, message: &IncomingMessage) -> bool {
        match &self.config.deferral_channel_id {
            Some(channel) => {
                message.channel_id == *channel
                    && self.config.wa_authors.contains(&message.author_name)
            }
            None => false,
        }
    }

    async fn create_observation(
        &self,
        message: &IncomingMessage,
        verdict: &FilterVerdict,
        secret_refs: Vec<String>,
    ) -> crate::Result<ObservationOutcome> {
        let now_iso = self.time.now_iso();
        let task = TaskRow::new(
            &self.config.origin,
            &message.channel_id,
            verdict.priority.task_priority(),
            format!("observation from {} in {}", message.author_name, message.channel_id),
            &now_iso,
        );
        TaskRepository::create(&self.pool, &task).await?;

        let context = ProcessingContext {
            filter_priority: Some(verdict.priority.as_str().to_string()),
            filter_reasoning: Some(verdict.reasoning.clone()),
            context_hints: verdict.context_hints.clone(),
            secret_refs,
            ..Default::default()
        };
        let thought = ThoughtRow::new(
            &task.id,
            ThoughtType::Observation,
            &message.content,
            task.priority,
            &now_iso,
        )
        .with_context(&context);
        ThoughtRepository::create(&self.pool, &thought).await?;

        self.audit
            .log_event(
                "observation",
                AuditEventData::new(thought.id.clone(), self.handler_name.clone())
                    .with_action("observe")
                    .with_resource(self.config.origin.clone())
                    .with_severity(if verdict.priority.is_urgent() {
                        "high"
                    } else {
                        "info"
                    })
                    .with_metadata("task_id", task.id.clone())
                    .with_metadata("channel_id", message.channel_id.clone())
                    .with_metadata("priority", verdict.priority.as_str()),
            )
            .await;

        if verdict.priority.is_urgent() {
            tracing::info!(
                message_id = %message.message_id,
                priority = %verdict.priority,
                reasoning = %verdict.reasoning,
                "created priority observation"
            );
        }

        Ok(ObservationOutcome::Observation {
            task_id: task.id,
            thought_id: thought.id,
            priority: verdict.priority,
        })
    }

    /// Memory lookups keyed by channel; results warm the store, failures
    /// are non-fatal.
    async fn recall_context(&self, message: &IncomingMessage) {
        let query = MemoryQuery {
            node_id: format!("channel/{}", message.channel_id),
            scope: GraphScope::Local,
        };
        if let Err(e) = self.memory_bus.recall(&self.handler_name, query).await {
            tracing::debug!(
                channel_id = %message.channel_id,
                error = %e,
                "context recall unavailable"
            );
        }
    }
}
