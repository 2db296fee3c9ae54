//! Processor round integration tests: dispatch, depth guarding, task
//! settlement, and state-coupled rounds.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex as AsyncMutex;

use meridian_core::schemas::{
    AgentState, TaskStatus, ThoughtStatus, ThoughtType,
};
use meridian_core::time::{ManualTimeService, TimeService};
use meridian_core::{BusManager, MemoryBus, ProviderRegistration, ServiceRegistry};

use meridian_runtime::audit::{AuditService, AuditServiceParams, ExportFormat};
use meridian_runtime::correlations::SqlCorrelationStore;
use meridian_runtime::db::models::{TaskRow, ThoughtRow};
use meridian_runtime::db::repositories::{TaskRepository, ThoughtRepository};
use meridian_runtime::db::schema;
use meridian_runtime::memory::LocalGraphMemory;
use meridian_runtime::processor::{
    ActionDecision, ActionSelector, Processor, ProcessorConfig, StateManager,
};
use meridian_runtime::sinks::{ActionSink, DeferralSink};

/// Selector scripted per test through a closure.
struct ScriptedSelector<F>(F);

#[async_trait]
impl<F> ActionSelector for ScriptedSelector<F>
where
    F: Fn(&TaskRow, &ThoughtRow) -> ActionDecision + Send + Sync,
{
    async fn select_action(
        &self,
        task: &TaskRow,
        thought: &ThoughtRow,
    ) -> meridian_core::Result<ActionDecision> {
        Ok((self.0)(task, thought))
    }
}

struct Harness {
    processor: Arc<Processor>,
    pool: SqlitePool,
    audit: Arc<AuditService>,
    action_sink: Arc<ActionSink>,
    deferral_sink: Arc<DeferralSink>,
    time: Arc<ManualTimeService>,
}

async fn harness<F>(initial_state: AgentState, select: F) -> Harness
where
    F: Fn(&TaskRow, &ThoughtRow) -> ActionDecision + Send + Sync + 'static,
{
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    schema::init_main_schema(&pool).await.unwrap();

    let manual_time = Arc::new(ManualTimeService::new());
    let time: Arc<dyn TimeService> = manual_time.clone();
    let registry = Arc::new(ServiceRegistry::new(time.clone()));
    let memory = Arc::new(LocalGraphMemory::new(pool.clone(), time.clone()));
    registry
        .memory
        .register(ProviderRegistration::new("local_graph_memory", memory as _));

    let correlations = Arc::new(SqlCorrelationStore::new(pool.clone(), time.clone()));
    let audit_memory_bus = Arc::new(MemoryBus::new(
        registry.clone(),
        correlations.clone(),
        time.clone(),
    ));
    // Chain disabled: these tests exercise rounds, not cryptography.
    let audit = AuditService::init(AuditServiceParams {
        memory_bus: audit_memory_bus,
        time: time.clone(),
        chain_pool: None,
        key_path: std::env::temp_dir(),
        export_path: None,
        export_format: ExportFormat::Jsonl,
        retention_days: 90,
        cache_size: 1000,
    })
    .await
    .unwrap();

    let buses = Arc::new(BusManager::new(
        registry.clone(),
        correlations,
        None,
        time.clone(),
    ));
    let action_sink = ActionSink::new(8, buses.communication.clone(), buses.tool.clone());
    let deferral_sink = DeferralSink::new(
        8,
        buses.wise_authority.clone(),
        buses.communication.clone(),
        None,
    );

    let state = Arc::new(AsyncMutex::new(StateManager::new(
        time.clone(),
        AgentState::Shutdown,
    )));
    {
        let mut guard = state.try_lock().unwrap();
        guard.transition_to(AgentState::Wakeup);
        if initial_state == AgentState::Work {
            guard.transition_to(AgentState::Work);
        }
    }

    let processor = Processor::new(
        pool.clone(),
        time,
        state,
        Arc::new(ScriptedSelector(select)),
        buses.memory.clone(),
        action_sink.clone(),
        deferral_sink.clone(),
        audit.clone(),
        None,
        None,
        ProcessorConfig {
            max_active_thoughts: 10,
            max_thought_depth: 7,
            round_delay_seconds: 0.01,
            enable_auto_defer: true,
        },
    );

    Harness {
        processor,
        pool,
        audit,
        action_sink,
        deferral_sink,
        time: manual_time,
    }
}

async fn seed_thought(pool: &SqlitePool, priority: i64, round_number: i64) -> (TaskRow, ThoughtRow) {
    let task = TaskRow::new("cli", "c1", priority, "work item", "2026-01-01T00:00:00Z");
    TaskRepository::create(pool, &task).await.unwrap();
    let mut thought = ThoughtRow::new(
        &task.id,
        ThoughtType::Observation,
        "observed input",
        priority,
        "2026-01-01T00:00:00Z",
    );
    thought.round_number = round_number;
    ThoughtRepository::create(pool, &thought).await.unwrap();
    (task, thought)
}

#[tokio::test]
async fn test_speak_completes_thought_and_task() {
    let harness = harness(AgentState::Work, |task, thought| ActionDecision::Speak {
        channel_id: task.origin_channel.clone(),
        content: format!("re: {}", thought.content),
    })
    .await;
    let (task, thought) = seed_thought(&harness.pool, 1, 0).await;

    let summary = harness.processor.single_step().await.unwrap();
    assert_eq!(summary.state, AgentState::Work);
    assert_eq!(summary.thoughts_selected, 1);
    assert_eq!(summary.thoughts_processed, 1);
    assert_eq!(summary.thoughts_deferred, 0);

    let thought = ThoughtRepository::get_by_id(&harness.pool, &thought.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thought.status(), Some(ThoughtStatus::Completed));
    let task = TaskRepository::get_by_id(&harness.pool, &task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status(), Some(TaskStatus::Completed));

    // The outbound message is queued on the action sink.
    assert_eq!(harness.action_sink.queued().await, 1);

    // Every agent-initiated action leaves an audit entry bound to its
    // thought.
    let trail = harness
        .audit
        .get_audit_trail(Some(&thought.id), 24, None)
        .await
        .unwrap();
    assert!(trail.iter().any(|e| e.event_type == "speak"));
}

#[tokio::test]
async fn test_max_depth_defers_instead_of_processing() {
    let harness = harness(AgentState::Work, |_, _| ActionDecision::CompleteTask).await;
    let (task, thought) = seed_thought(&harness.pool, 1, 7).await;

    let summary = harness.processor.single_step().await.unwrap();
    assert_eq!(summary.thoughts_deferred, 1);
    assert_eq!(summary.thoughts_processed, 0);

    let thought = ThoughtRepository::get_by_id(&harness.pool, &thought.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thought.status(), Some(ThoughtStatus::Deferred));
    assert_eq!(thought.context().defer_reason.as_deref(), Some("max_depth"));

    let task = TaskRepository::get_by_id(&harness.pool, &task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status(), Some(TaskStatus::Deferred));

    // Deferred task implies a defer audit entry naming one of its thoughts.
    let trail = harness
        .audit
        .get_audit_trail(Some(&thought.id), 24, None)
        .await
        .unwrap();
    assert!(trail.iter().any(|e| e.event_type == "defer"));

    // And a deferral package queued for the wise authority.
    assert_eq!(harness.deferral_sink.queued().await, 1);
}

#[tokio::test]
async fn test_batch_respects_priority_order() {
    let harness = harness(AgentState::Work, |_, _| ActionDecision::CompleteTask).await;
    seed_thought(&harness.pool, 1, 0).await;
    seed_thought(&harness.pool, 9, 0).await;
    seed_thought(&harness.pool, 5, 0).await;

    let summary = harness.processor.single_step().await.unwrap();
    assert_eq!(summary.thoughts_selected, 3);
    assert_eq!(summary.thoughts_processed, 3);
    assert_eq!(summary.active_after, 0);
}

#[tokio::test]
async fn test_ponder_spawns_follow_up() {
    let harness = harness(AgentState::Work, |_, thought| {
        if thought.thought_type() == Some(ThoughtType::Observation) {
            ActionDecision::Ponder {
                content: "need more thought".to_string(),
            }
        } else {
            ActionDecision::CompleteTask
        }
    })
    .await;
    let (task, thought) = seed_thought(&harness.pool, 1, 0).await;

    harness.processor.single_step().await.unwrap();

    let thoughts = ThoughtRepository::for_task(&harness.pool, &task.id)
        .await
        .unwrap();
    assert_eq!(thoughts.len(), 2);
    let follow_up = thoughts
        .iter()
        .find(|t| t.thought_type() == Some(ThoughtType::FollowUp))
        .unwrap();
    assert_eq!(follow_up.parent_thought_id.as_deref(), Some(thought.id.as_str()));
    assert_eq!(follow_up.round_number, 1);
    assert_eq!(follow_up.status(), Some(ThoughtStatus::Pending));

    // Task stays open until the follow-up settles.
    let task_row = TaskRepository::get_by_id(&harness.pool, &task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task_row.status(), Some(TaskStatus::Active));

    // Second round completes the follow-up and the task.
    harness.processor.single_step().await.unwrap();
    let task_row = TaskRepository::get_by_id(&harness.pool, &task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task_row.status(), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_reject_fails_thought_and_task() {
    let harness = harness(AgentState::Work, |_, _| ActionDecision::Reject {
        reason: "outside permitted actions".to_string(),
    })
    .await;
    let (task, thought) = seed_thought(&harness.pool, 1, 0).await;

    harness.processor.single_step().await.unwrap();

    let thought = ThoughtRepository::get_by_id(&harness.pool, &thought.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thought.status(), Some(ThoughtStatus::Failed));
    let task = TaskRepository::get_by_id(&harness.pool, &task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status(), Some(TaskStatus::Failed));
}

#[tokio::test]
async fn test_wakeup_round_flags_completion_and_auto_transition() {
    let harness = harness(AgentState::Wakeup, |_, _| ActionDecision::CompleteTask).await;

    let summary = harness.processor.single_step().await.unwrap();
    assert_eq!(summary.state, AgentState::Wakeup);

    let state = harness.processor.state_manager();
    let mut guard = state.lock().await;
    assert_eq!(guard.should_auto_transition(), Some(AgentState::Work));
    assert!(guard.transition_to(AgentState::Work));
}

#[tokio::test]
async fn test_shutdown_round_defers_pending_work() {
    let harness = harness(AgentState::Work, |_, _| ActionDecision::CompleteTask).await;
    seed_thought(&harness.pool, 1, 0).await;
    seed_thought(&harness.pool, 2, 0).await;

    {
        let state = harness.processor.state_manager();
        let mut guard = state.lock().await;
        assert!(guard.transition_to(AgentState::Shutdown));
    }

    let summary = harness.processor.single_step().await.unwrap();
    assert_eq!(summary.state, AgentState::Shutdown);
    assert_eq!(summary.thoughts_deferred, 2);
    assert_eq!(summary.active_after, 0);
}

#[tokio::test]
async fn test_selector_error_fails_thought_with_round_error() {
    let harness = harness(AgentState::Work, |_, _| ActionDecision::CompleteTask).await;

    // Swap in a failing selector by deleting the task under the thought:
    // processing an orphan must fail it, not crash the round.
    let (task, thought) = seed_thought(&harness.pool, 1, 0).await;
    sqlx::query("DELETE FROM thoughts WHERE id != ?")
        .bind(&thought.id)
        .execute(&harness.pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(&task.id)
        .execute(&harness.pool)
        .await
        .unwrap();

    harness.processor.single_step().await.unwrap();
    let thought = ThoughtRepository::get_by_id(&harness.pool, &thought.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thought.status(), Some(ThoughtStatus::Failed));

    let trail = harness
        .audit
        .get_audit_trail(Some(&thought.id), 24, None)
        .await
        .unwrap();
    assert!(trail.iter().any(|e| e.event_type == "round_error"));
}

#[tokio::test]
async fn test_single_step_reports_elapsed_time() {
    let harness = harness(AgentState::Work, |_, _| ActionDecision::CompleteTask).await;
    let _ = harness.time; // manual clock does not advance during the round
    let summary = harness.processor.single_step().await.unwrap();
    assert_eq!(summary.elapsed_ms, 0);
    assert!(summary.round_number >= 1);
}
