//! Feedback sink
//!
//! Processes wise-authority replies to deferral reports, converting each
//! into a correction thought parented on the deferred thought. Corrections
//! referencing an already-corrected thought are deduplicated.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use meridian_core::buses::AuditEventSink;
use meridian_core::schemas::{AuditEventData, IncomingMessage, ThoughtType};
use meridian_core::time::TimeService;

use crate::db::models::{ProcessingContext, ThoughtRow};
use crate::db::repositories::{TaskRepository, ThoughtRepository};

use super::SinkQueue;

/// One wise-authority correction to apply.
#[derive(Debug, Clone)]
pub struct FeedbackItem {
    pub message: IncomingMessage,
    pub deferred_thought_id: String,
}

/// Sink converting WA feedback into correction thoughts.
pub struct FeedbackSink {
    queue: Arc<SinkQueue<FeedbackItem>>,
    pool: SqlitePool,
    time: Arc<dyn TimeService>,
    audit: Arc<dyn AuditEventSink>,
}

impl FeedbackSink {
    pub fn new(
        max_queue_size: usize,
        pool: SqlitePool,
        time: Arc<dyn TimeService>,
        audit: Arc<dyn AuditEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: SinkQueue::new("feedback_sink", max_queue_size),
            pool,
            time,
            audit,
        })
    }

    /// Queue a feedback item. Returns `false` on backpressure.
    pub async fn enqueue(&self, item: FeedbackItem) -> bool {
        self.queue.enqueue(item).await
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub async fn queued(&self) -> usize {
        self.queue.len().await
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("feedback sink processing started");
            while let Some(item) = sink.queue.next().await {
                match sink.process_feedback(item).await {
                    Ok(Some(thought_id)) => {
                        tracing::info!(thought_id, "created correction thought from WA feedback");
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "error processing WA feedback"),
                }
            }
            tracing::info!("feedback sink processing stopped");
        })
    }

    /// Create the correction thought for one feedback item. Returns the new
    /// thought id, or `None` when the item was dropped (unknown parent or
    /// duplicate correction).
    pub async fn process_feedback(&self, item: FeedbackItem) -> crate::Result<Option<String>> {
        let Some(deferred) =
            ThoughtRepository::get_by_id(&self.pool, &item.deferred_thought_id).await?
        else {
            tracing::warn!(
                deferred_thought_id = %item.deferred_thought_id,
                "WA feedback references unknown thought"
            );
            return Ok(None);
        };

        if ThoughtRepository::find_correction_for_parent(&self.pool, &deferred.id)
            .await?
            .is_some()
        {
            tracing::debug!(
                deferred_thought_id = %deferred.id,
                "correction already exists; deduplicating WA feedback"
            );
            return Ok(None);
        }

        // Priority is inherited from the originating task.
        let priority = match TaskRepository::get_by_id(&self.pool, &deferred.source_task_id).await?
        {
            Some(task) => task.priority,
            None => deferred.priority,
        };

        let context = ProcessingContext {
            is_wa_feedback: true,
            wa_author: Some(item.message.author_name.clone()),
            ..Default::default()
        };
        let now_iso = self.time.now_iso();
        let correction = ThoughtRow::new(
            &deferred.source_task_id,
            ThoughtType::Correction,
            &item.message.content,
            priority,
            &now_iso,
        )
        .with_parent(&deferred.id, deferred.round_number + 1)
        .with_context(&context);

        ThoughtRepository::create(&self.pool, &correction).await?;

        self.audit
            .log_event(
                "wa_correction",
                AuditEventData::new(correction.id.clone(), item.message.author_name.clone())
                    .with_action("correction")
                    .with_resource("feedback_sink")
                    .with_metadata("parent_thought_id", deferred.id.clone())
                    .with_metadata("task_id", deferred.source_task_id.clone()),
            )
            .await;

        Ok(Some(correction.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TaskRow;
    use crate::db::schema::init_main_schema;
    use async_trait::async_trait;
    use chrono::Utc;
    use meridian_core::schemas::ThoughtStatus;
    use meridian_core::time::ManualTimeService;

    struct NullAudit;

    #[async_trait]
    impl AuditEventSink for NullAudit {
        async fn log_event(&self, _event_type: &str, _data: AuditEventData) {}
    }

    async fn setup() -> (Arc<FeedbackSink>, SqlitePool, TaskRow, ThoughtRow) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_main_schema(&pool).await.unwrap();

        let task = TaskRow::new("chat", "deferral-channel", 4, "t", "2026-01-01T00:00:00Z");
        TaskRepository::create(&pool, &task).await.unwrap();
        let mut deferred = ThoughtRow::new(
            &task.id,
            ThoughtType::Observation,
            "should I do this?",
            task.priority,
            "2026-01-01T00:00:00Z",
        );
        deferred.status = ThoughtStatus::Deferred.as_str().to_string();
        deferred.round_number = 2;
        ThoughtRepository::create(&pool, &deferred).await.unwrap();

        let sink = FeedbackSink::new(
            10,
            pool.clone(),
            Arc::new(ManualTimeService::new()),
            Arc::new(NullAudit),
        );
        (sink, pool, task, deferred)
    }

    fn wa_reply(deferred_id: &str) -> FeedbackItem {
        let mut message = IncomingMessage::new(
            "m_wa_1",
            "wa_1",
            "WA_USER",
            "deferral-channel",
            "yes, proceed carefully",
            Utc::now(),
        );
        message.reference_message_id = Some(deferred_id.to_string());
        FeedbackItem {
            message,
            deferred_thought_id: deferred_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_correction_created_with_inherited_priority() {
        let (sink, pool, task, deferred) = setup().await;
        let thought_id = sink
            .process_feedback(wa_reply(&deferred.id))
            .await
            .unwrap()
            .unwrap();

        let correction = ThoughtRepository::get_by_id(&pool, &thought_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(correction.parent_thought_id.as_deref(), Some(deferred.id.as_str()));
        assert_eq!(correction.thought_type(), Some(ThoughtType::Correction));
        assert_eq!(correction.priority, task.priority);
        assert_eq!(correction.round_number, deferred.round_number + 1);
        assert!(correction.context().is_wa_feedback);
        assert_eq!(correction.context().wa_author.as_deref(), Some("WA_USER"));
    }

    #[tokio::test]
    async fn test_duplicate_correction_deduplicated() {
        let (sink, _pool, _task, deferred) = setup().await;
        assert!(sink
            .process_feedback(wa_reply(&deferred.id))
            .await
            .unwrap()
            .is_some());
        assert!(sink
            .process_feedback(wa_reply(&deferred.id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_parent_dropped() {
        let (sink, _pool, _task, _deferred) = setup().await;
        assert!(sink
            .process_feedback(wa_reply("thought_missing"))
            .await
            .unwrap()
            .is_none());
    }
}
