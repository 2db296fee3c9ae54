//! Outbound action sink
//!
//! Generic agent actions (send a message, run a tool) queued by the
//! processor and delivered through the communication and tool buses. Per-
//! item failures are logged and do not stop the loop.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use meridian_core::{CommunicationBus, ToolBus};

use super::SinkQueue;

const HANDLER_NAME: &str = "action_sink";

/// An outbound action.
#[derive(Debug, Clone)]
pub enum SinkAction {
    SendMessage { channel_id: String, content: String },
    RunTool { name: String, params: Value },
}

/// Sink delivering generic outbound actions.
pub struct ActionSink {
    queue: Arc<SinkQueue<SinkAction>>,
    communication: Arc<CommunicationBus>,
    tool: Arc<ToolBus>,
}

impl ActionSink {
    pub fn new(
        max_queue_size: usize,
        communication: Arc<CommunicationBus>,
        tool: Arc<ToolBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: SinkQueue::new("action_sink", max_queue_size),
            communication,
            tool,
        })
    }

    /// Queue an action. Returns `false` on backpressure.
    pub async fn enqueue(&self, action: SinkAction) -> bool {
        self.queue.enqueue(action).await
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub async fn queued(&self) -> usize {
        self.queue.len().await
    }

    /// Spawn the processing loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("action sink processing started");
            while let Some(action) = sink.queue.next().await {
                if let Err(e) = sink.process_action(action).await {
                    tracing::error!(error = %e, "error processing action");
                }
            }
            tracing::info!("action sink processing stopped");
        })
    }

    async fn process_action(&self, action: SinkAction) -> meridian_core::Result<()> {
        match action {
            SinkAction::SendMessage {
                channel_id,
                content,
            } => {
                let sent = self
                    .communication
                    .send_message(HANDLER_NAME, &channel_id, &content)
                    .await?;
                if !sent {
                    tracing::warn!(channel_id, "communication provider declined message");
                }
            }
            SinkAction::RunTool { name, params } => {
                let result = self.tool.execute_tool(HANDLER_NAME, &name, params).await?;
                if !result.success {
                    tracing::warn!(
                        tool = name,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "tool execution failed"
                    );
                }
            }
        }
        Ok(())
    }
}
