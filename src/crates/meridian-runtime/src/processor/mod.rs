//! Per-round processor loop
//!
//! The processor drives one round at a time, bound to the current agent
//! state: WORK pulls a batch of pending thoughts and dispatches them, DREAM
//! runs consolidation, PLAY and SOLITUDE are reduced variants, WAKEUP
//! initializes identity context, SHUTDOWN defers whatever is left. Action
//! selection itself is an external collaborator behind [`ActionSelector`];
//! this module owns dispatch, auditing, and status bookkeeping.

pub mod state_manager;

pub use state_manager::{StateChange, StateManager, StateMetadata};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use meridian_core::schemas::{
    ActionKind, AgentState, AuditActionContext, AuditEventData, DeferralContext, GraphNode,
    TaskStatus, ThoughtStatus, ThoughtType,
};
use meridian_core::time::TimeService;
use meridian_core::MemoryBus;

use crate::audit::AuditService;
use crate::db::models::{TaskRow, ThoughtRow};
use crate::db::repositories::{TaskRepository, ThoughtRepository};
use crate::identity::IdentityManager;
use crate::resource::ResourceMonitor;
use crate::sinks::{ActionSink, DeferralSink, SinkAction};

const HANDLER_NAME: &str = "agent_processor";

/// The action chosen for one thought.
#[derive(Debug, Clone)]
pub enum ActionDecision {
    /// Send a message to a channel.
    Speak { channel_id: String, content: String },
    /// Execute a tool.
    UseTool {
        name: String,
        params: serde_json::Value,
    },
    /// Escalate to the wise authority.
    Defer { reason: String },
    /// Refuse the work.
    Reject { reason: String },
    /// Store a node in graph memory.
    Memorize { node: GraphNode },
    /// Continue reasoning in a follow-up thought.
    Ponder { content: String },
    /// Nothing further to do for this task.
    CompleteTask,
}

/// External collaborator that picks an action for a thought.
#[async_trait]
pub trait ActionSelector: Send + Sync {
    async fn select_action(
        &self,
        task: &TaskRow,
        thought: &ThoughtRow,
    ) -> meridian_core::Result<ActionDecision>;
}

/// Default selector wired in when no decision stack is configured: answers
/// observations on their origin channel and completes everything else.
pub struct EchoSelector;

#[async_trait]
impl ActionSelector for EchoSelector {
    async fn select_action(
        &self,
        task: &TaskRow,
        thought: &ThoughtRow,
    ) -> meridian_core::Result<ActionDecision> {
        if thought.thought_type() == Some(ThoughtType::Observation) {
            Ok(ActionDecision::Speak {
                channel_id: task.origin_channel.clone(),
                content: format!("observed: {}", thought.content),
            })
        } else {
            Ok(ActionDecision::CompleteTask)
        }
    }
}

/// Processor limits, derived from the essential configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_active_thoughts: u32,
    pub max_thought_depth: u32,
    pub round_delay_seconds: f64,
    pub enable_auto_defer: bool,
}

impl ProcessorConfig {
    pub fn from_essential(config: &crate::config::EssentialConfig) -> Self {
        Self {
            max_active_thoughts: config.limits.max_active_thoughts,
            max_thought_depth: config.security.max_thought_depth,
            round_delay_seconds: config.limits.round_delay_seconds,
            enable_auto_defer: config.workflow.enable_auto_defer,
        }
    }
}

/// Counters returned by `single_step`.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round_number: u64,
    pub state: AgentState,
    pub thoughts_selected: usize,
    pub thoughts_processed: usize,
    pub thoughts_deferred: usize,
    pub active_before: i64,
    pub active_after: i64,
    pub elapsed_ms: u64,
}

/// Per-round workload driver coupled to the agent state.
pub struct Processor {
    pool: SqlitePool,
    time: Arc<dyn TimeService>,
    state: Arc<AsyncMutex<StateManager>>,
    selector: Arc<dyn ActionSelector>,
    memory_bus: Arc<MemoryBus>,
    action_sink: Arc<ActionSink>,
    deferral_sink: Arc<DeferralSink>,
    audit: Arc<AuditService>,
    resource: Option<Arc<ResourceMonitor>>,
    identity: Option<Arc<IdentityManager>>,
    config: ProcessorConfig,
    round_number: AtomicU64,
    paused: watch::Sender<bool>,
    stop: watch::Sender<bool>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        time: Arc<dyn TimeService>,
        state: Arc<AsyncMutex<StateManager>>,
        selector: Arc<dyn ActionSelector>,
        memory_bus: Arc<MemoryBus>,
        action_sink: Arc<ActionSink>,
        deferral_sink: Arc<DeferralSink>,
        audit: Arc<AuditService>,
        resource: Option<Arc<ResourceMonitor>>,
        identity: Option<Arc<IdentityManager>>,
        config: ProcessorConfig,
    ) -> Arc<Self> {
        let (paused, _) = watch::channel(false);
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            pool,
            time,
            state,
            selector,
            memory_bus,
            action_sink,
            deferral_sink,
            audit,
            resource,
            identity,
            config,
            round_number: AtomicU64::new(0),
            paused,
            stop,
        })
    }

    pub fn state_manager(&self) -> Arc<AsyncMutex<StateManager>> {
        self.state.clone()
    }

    /// Pause the loop without ending the process.
    pub fn pause(&self) {
        let _ = self.paused.send(true);
        tracing::info!("processor paused");
    }

    /// Resume a paused loop.
    pub fn resume(&self) {
        let _ = self.paused.send(false);
        tracing::info!("processor resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Request the loop to exit.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Request a transition into SHUTDOWN; used by the resource signal
    /// handler and the runtime.
    pub async fn request_shutdown_transition(&self) -> bool {
        let mut state = self.state.lock().await;
        state.transition_to(AgentState::Shutdown)
    }

    /// Defer every pending thought, recording the reason. Used when a
    /// critical resource signal fires and on shutdown.
    pub async fn defer_pending_work(&self, reason: &str) -> crate::Result<usize> {
        let pending = ThoughtRepository::pending_batch(&self.pool, u32::MAX).await?;
        let mut deferred = 0usize;
        for thought in pending {
            self.defer_thought(&thought, reason).await?;
            deferred += 1;
        }
        if deferred > 0 {
            tracing::info!(deferred, reason, "deferred pending work");
        }
        Ok(deferred)
    }

    /// Run rounds until stopped, honoring pause and the round delay.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let processor = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();
        tokio::spawn(async move {
            tracing::info!("processor loop started");
            let delay = std::time::Duration::from_secs_f64(
                processor.config.round_delay_seconds.max(0.01),
            );
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                if processor.is_paused() {
                    let mut paused_rx = processor.paused.subscribe();
                    tokio::select! {
                        _ = paused_rx.changed() => {}
                        _ = stop_rx.changed() => break,
                    }
                    continue;
                }

                match processor.single_step().await {
                    Ok(summary) => {
                        tracing::debug!(
                            round = summary.round_number,
                            state = %summary.state,
                            processed = summary.thoughts_processed,
                            deferred = summary.thoughts_deferred,
                            elapsed_ms = summary.elapsed_ms,
                            "round complete"
                        );
                    }
                    Err(e) => tracing::error!(error = %e, "round failed"),
                }

                {
                    let mut state = processor.state.lock().await;
                    if let Some(next) = state.should_auto_transition() {
                        state.transition_to(next);
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("processor loop stopped");
        })
    }

    /// Execute exactly one round.
    pub async fn single_step(&self) -> crate::Result<RoundSummary> {
        let started = self.time.timestamp();
        let round = self.round_number.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state.lock().await.current_state();
        let active_before = ThoughtRepository::count_active(&self.pool).await?;

        let (selected, processed, deferred) = match state {
            AgentState::Wakeup => {
                self.wakeup_round().await?;
                (0, 0, 0)
            }
            AgentState::Work => self.work_round(self.config.max_active_thoughts).await?,
            AgentState::Play => {
                // Reduced-batch variant of the work round.
                let batch = (self.config.max_active_thoughts / 2).max(1);
                self.work_round(batch).await?
            }
            AgentState::Solitude => self.solitude_round().await?,
            AgentState::Dream => {
                self.dream_round().await?;
                (0, 0, 0)
            }
            AgentState::Shutdown => {
                let deferred = self.defer_pending_work("shutdown").await?;
                (deferred, 0, deferred)
            }
        };

        let active_after = ThoughtRepository::count_active(&self.pool).await?;
        let elapsed_ms = ((self.time.timestamp() - started) * 1000.0) as u64;
        Ok(RoundSummary {
            round_number: round,
            state,
            thoughts_selected: selected,
            thoughts_processed: processed,
            thoughts_deferred: deferred,
            active_before,
            active_after,
            elapsed_ms,
        })
    }

    async fn wakeup_round(&self) -> crate::Result<()> {
        if let Some(identity) = &self.identity {
            if !identity.verify_identity_integrity().await {
                return Err(crate::RuntimeError::Identity(
                    "identity integrity check failed during wakeup".to_string(),
                ));
            }
        }
        let mut state = self.state.lock().await;
        state.update_state_metadata("wakeup_complete", json!(true));
        drop(state);

        let _ = self
            .audit
            .log_event(
                "wakeup_complete",
                AuditEventData::new("agent", HANDLER_NAME)
                    .with_action("wakeup")
                    .with_resource("processor"),
            )
            .await;
        Ok(())
    }

    /// WORK round: select, guard depth, dispatch, settle statuses.
    async fn work_round(&self, batch_limit: u32) -> crate::Result<(usize, usize, usize)> {
        let mut limit = batch_limit;

        if let Some(monitor) = &self.resource {
            let snapshot = monitor.snapshot();
            if !snapshot.critical.is_empty() {
                if self.config.enable_auto_defer {
                    let deferred = self.defer_pending_work("resource_critical").await?;
                    return Ok((deferred, 0, deferred));
                }
                return Ok((0, 0, 0));
            }
            if !snapshot.warnings.is_empty() {
                limit = (limit / 2).max(1);
            }
        }

        let batch = ThoughtRepository::pending_batch(&self.pool, limit).await?;
        let selected = batch.len();
        let mut processed = 0usize;
        let mut deferred = 0usize;

        for thought in batch {
            if thought.round_number >= i64::from(self.config.max_thought_depth) {
                self.defer_thought(&thought, "max_depth").await?;
                deferred += 1;
                continue;
            }
            match self.process_thought(thought).await {
                Ok(()) => processed += 1,
                Err(e) => tracing::error!(error = %e, "thought processing failed"),
            }
        }
        Ok((selected, processed, deferred))
    }

    /// SOLITUDE round: minimal processing, critical-priority work only.
    async fn solitude_round(&self) -> crate::Result<(usize, usize, usize)> {
        let batch = ThoughtRepository::pending_batch(&self.pool, self.config.max_active_thoughts)
            .await?;
        let critical: Vec<ThoughtRow> = batch
            .into_iter()
            .filter(|t| {
                t.priority >= meridian_core::schemas::FilterPriority::Critical.task_priority()
            })
            .collect();

        let selected = critical.len();
        let mut processed = 0usize;
        let mut deferred = 0usize;
        for thought in critical {
            if thought.round_number >= i64::from(self.config.max_thought_depth) {
                self.defer_thought(&thought, "max_depth").await?;
                deferred += 1;
                continue;
            }
            match self.process_thought(thought).await {
                Ok(()) => processed += 1,
                Err(e) => tracing::error!(error = %e, "thought processing failed"),
            }
        }
        Ok((selected, processed, deferred))
    }

    /// DREAM round: consolidation and self-maintenance.
    async fn dream_round(&self) -> crate::Result<()> {
        let pruned = self.audit.prune_expired().await.unwrap_or(0);
        let _ = self
            .audit
            .log_event(
                "dream_consolidation",
                AuditEventData::new("agent", HANDLER_NAME)
                    .with_action("consolidate")
                    .with_resource("processor")
                    .with_metadata("audit_nodes_pruned", pruned.to_string()),
            )
            .await;
        Ok(())
    }

    async fn process_thought(&self, thought: ThoughtRow) -> crate::Result<()> {
        let Some(task) = TaskRepository::get_by_id(&self.pool, &thought.source_task_id).await?
        else {
            // Orphaned thought; fail it rather than loop on it forever.
            self.fail_thought(&thought, "task missing").await?;
            return Ok(());
        };

        if task.status() == Some(TaskStatus::Pending) {
            TaskRepository::update_status(
                &self.pool,
                &task.id,
                TaskStatus::Active,
                &self.time.now_iso(),
            )
            .await?;
        }
        ThoughtRepository::update_status(
            &self.pool,
            &thought.id,
            ThoughtStatus::Processing,
            &self.time.now_iso(),
        )
        .await?;

        match self.selector.select_action(&task, &thought).await {
            Ok(decision) => self.dispatch(&task, &thought, decision).await,
            Err(e) => {
                self.fail_thought(&thought, &e.to_string()).await?;
                Ok(())
            }
        }
    }

    async fn dispatch(
        &self,
        task: &TaskRow,
        thought: &ThoughtRow,
        decision: ActionDecision,
    ) -> crate::Result<()> {
        let context = AuditActionContext::new(&thought.id, &task.id, HANDLER_NAME);
        match decision {
            ActionDecision::Speak {
                channel_id,
                content,
            } => {
                let queued = self
                    .action_sink
                    .enqueue(SinkAction::SendMessage {
                        channel_id,
                        content,
                    })
                    .await;
                if queued {
                    let _ = self
                        .audit
                        .log_action(ActionKind::Speak, context, Some("queued".into()))
                        .await;
                    self.complete_thought(task, thought).await?;
                } else {
                    // Sustained backpressure becomes deferral.
                    self.defer_thought(thought, "action_sink_backpressure").await?;
                }
            }
            ActionDecision::UseTool { name, params } => {
                let queued = self
                    .action_sink
                    .enqueue(SinkAction::RunTool { name, params })
                    .await;
                if queued {
                    let _ = self
                        .audit
                        .log_action(ActionKind::Tool, context, Some("queued".into()))
                        .await;
                    self.complete_thought(task, thought).await?;
                } else {
                    self.defer_thought(thought, "action_sink_backpressure").await?;
                }
            }
            ActionDecision::Defer { reason } => {
                self.defer_thought(thought, &reason).await?;
            }
            ActionDecision::Reject { reason } => {
                let _ = self
                    .audit
                    .log_action(ActionKind::Reject, context, Some(reason.clone()))
                    .await;
                self.fail_thought(thought, &reason).await?;
            }
            ActionDecision::Memorize { node } => {
                let result = self.memory_bus.memorize(HANDLER_NAME, node).await?;
                let outcome = if result.is_ok() { "ok" } else { "denied" };
                let _ = self
                    .audit
                    .log_action(ActionKind::Memorize, context, Some(outcome.into()))
                    .await;
                self.complete_thought(task, thought).await?;
            }
            ActionDecision::Ponder { content } => {
                let follow_up = ThoughtRow::new(
                    &task.id,
                    ThoughtType::FollowUp,
                    content,
                    thought.priority,
                    &self.time.now_iso(),
                )
                .with_parent(&thought.id, thought.round_number + 1);
                ThoughtRepository::create(&self.pool, &follow_up).await?;
                let _ = self
                    .audit
                    .log_action(ActionKind::Ponder, context, None)
                    .await;
                ThoughtRepository::update_status(
                    &self.pool,
                    &thought.id,
                    ThoughtStatus::Completed,
                    &self.time.now_iso(),
                )
                .await?;
                // Task stays active; the follow-up keeps it open.
            }
            ActionDecision::CompleteTask => {
                let _ = self
                    .audit
                    .log_action(ActionKind::TaskComplete, context, None)
                    .await;
                self.complete_thought(task, thought).await?;
            }
        }
        Ok(())
    }

    async fn complete_thought(&self, task: &TaskRow, thought: &ThoughtRow) -> crate::Result<()> {
        ThoughtRepository::update_status(
            &self.pool,
            &thought.id,
            ThoughtStatus::Completed,
            &self.time.now_iso(),
        )
        .await?;
        self.settle_task(&task.id).await
    }

    async fn fail_thought(&self, thought: &ThoughtRow, reason: &str) -> crate::Result<()> {
        ThoughtRepository::update_status(
            &self.pool,
            &thought.id,
            ThoughtStatus::Failed,
            &self.time.now_iso(),
        )
        .await?;
        let _ = self
            .audit
            .log_event(
                "round_error",
                AuditEventData::new(thought.id.clone(), HANDLER_NAME)
                    .with_action("round_error")
                    .with_outcome("failure")
                    .with_severity("high")
                    .with_reason(reason)
                    .with_metadata("task_id", thought.source_task_id.clone()),
            )
            .await;
        self.settle_task(&thought.source_task_id).await
    }

    /// Defer a thought: status, defer reason, audit entry, and a deferral
    /// package to the wise authority. The owning task moves to DEFERRED.
    async fn defer_thought(&self, thought: &ThoughtRow, reason: &str) -> crate::Result<()> {
        ThoughtRepository::mark_deferred(&self.pool, &thought.id, reason, &self.time.now_iso())
            .await?;
        let _ = self
            .audit
            .log_action(
                ActionKind::Defer,
                AuditActionContext::new(&thought.id, &thought.source_task_id, HANDLER_NAME),
                Some(reason.to_string()),
            )
            .await;
        let queued = self
            .deferral_sink
            .enqueue(DeferralContext::new(
                &thought.id,
                &thought.source_task_id,
                reason,
            ))
            .await;
        if !queued {
            tracing::warn!(thought_id = %thought.id, "deferral sink full; deferral recorded locally only");
        }
        TaskRepository::update_status(
            &self.pool,
            &thought.source_task_id,
            TaskStatus::Deferred,
            &self.time.now_iso(),
        )
        .await?;
        Ok(())
    }

    /// Settle the owning task once all of its thoughts are terminal.
    async fn settle_task(&self, task_id: &str) -> crate::Result<()> {
        let thoughts = ThoughtRepository::for_task(&self.pool, task_id).await?;
        if thoughts.is_empty() {
            return Ok(());
        }
        let all_terminal = thoughts
            .iter()
            .all(|t| t.status().map(|s| s.is_terminal()).unwrap_or(false));
        if !all_terminal {
            return Ok(());
        }

        let any_failed = thoughts
            .iter()
            .any(|t| t.status() == Some(ThoughtStatus::Failed));
        let any_deferred = thoughts
            .iter()
            .any(|t| t.status() == Some(ThoughtStatus::Deferred));
        let final_status = if any_failed {
            TaskStatus::Failed
        } else if any_deferred {
            TaskStatus::Deferred
        } else {
            TaskStatus::Completed
        };
        TaskRepository::update_status(&self.pool, task_id, final_status, &self.time.now_iso())
            .await?;
        Ok(())
    }
}
