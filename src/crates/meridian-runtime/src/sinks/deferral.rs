//! Deferral sink
//!
//! Queues wise-authority deferral packages. Delivery prefers the
//! wise-authority service; when none is available (or it declines), the
//! deferral is posted as a formatted report through the communication bus
//! so a human still sees it.

use std::sync::Arc;

use tokio::task::JoinHandle;

use meridian_core::schemas::DeferralContext;
use meridian_core::{CommunicationBus, WiseAuthorityBus};

use super::SinkQueue;

const HANDLER_NAME: &str = "deferral_sink";

/// Render the human-readable fallback report for a deferral.
pub fn format_deferral_report(context: &DeferralContext) -> String {
    let mut report = format!(
        "**DEFERRAL**\nTask: {}\nThought: {}\nReason: {}",
        context.task_id, context.thought_id, context.reason
    );
    if let Some(defer_until) = &context.defer_until {
        report.push_str(&format!("\nDefer until: {}", defer_until.to_rfc3339()));
    }
    for (key, value) in &context.metadata {
        report.push_str(&format!("\n{key}: {value}"));
    }
    report
}

/// Sink delivering deferral packages to the wise authority.
pub struct DeferralSink {
    queue: Arc<SinkQueue<DeferralContext>>,
    wise_authority: Arc<WiseAuthorityBus>,
    communication: Arc<CommunicationBus>,
    fallback_channel_id: Option<String>,
}

impl DeferralSink {
    pub fn new(
        max_queue_size: usize,
        wise_authority: Arc<WiseAuthorityBus>,
        communication: Arc<CommunicationBus>,
        fallback_channel_id: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: SinkQueue::new("deferral_sink", max_queue_size),
            wise_authority,
            communication,
            fallback_channel_id,
        })
    }

    /// Queue a deferral package. Returns `false` on backpressure.
    pub async fn enqueue(&self, context: DeferralContext) -> bool {
        self.queue.enqueue(context).await
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
            tracing::info!("deferral sink processing started");
            while let Some(context) = sink.queue.next().await {
                sink.send_deferral(context).await;
            }
            tracing::info!("deferral sink processing stopped");
        })
    }

    async fn send_deferral(&self, context: DeferralContext) {
        match self
            .wise_authority
            .submit_deferral(HANDLER_NAME, context.clone())
            .await
        {
            Ok(true) => {
                tracing::info!(thought_id = %context.thought_id, "deferral submitted to wise authority");
                return;
            }
            Ok(false) => {
                tracing::warn!(thought_id = %context.thought_id, "wise authority declined deferral");
            }
            Err(e) => {
                tracing::warn!(thought_id = %context.thought_id, error = %e, "wise authority unavailable for deferral");
            }
        }

        // Fallback: post a formatted report where a human will see it.
        let Some(channel) = &self.fallback_channel_id else {
            tracing::warn!(
                thought_id = %context.thought_id,
                reason = %context.reason,
                "no deferral delivery path; logging only"
            );
            return;
        };
        let report = format_deferral_report(&context);
        match self
            .communication
            .send_message(HANDLER_NAME, channel, &report)
            .await
        {
            Ok(true) => {
                tracing::info!(thought_id = %context.thought_id, "deferral reported via communication fallback");
            }
            Ok(false) | Err(_) => {
                tracing::error!(
                    thought_id = %context.thought_id,
                    reason = %context.reason,
                    "failed to deliver deferral through any path"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_contains_fields() {
        let mut context = DeferralContext::new("thought_1", "task_1", "needs human judgment");
        context
            .metadata
            .insert("channel".to_string(), "c9".to_string());
        let report = format_deferral_report(&context);
        assert!(report.contains("**DEFERRAL**"));
        assert!(report.contains("Task: task_1"));
        assert!(report.contains("Thought: thought_1"));
        assert!(report.contains("needs human judgment"));
        assert!(report.contains("channel: c9"));
    }
}
