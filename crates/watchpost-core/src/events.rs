use serde::Serialize;
use tokio::sync::broadcast;

use crate::notify::{Channel, NotificationStatus};
use crate::workflow::ExecutionStatus;

/// Lifecycle events published after the corresponding history record is
/// written.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    JobRunCompleted {
        job_id: String,
        run_id: String,
        run_count: u64,
        succeeded: usize,
        failed: usize,
    },
    JobDeleted {
        job_id: String,
    },
    WorkflowFinished {
        workflow_id: String,
        execution_id: String,
        status: ExecutionStatus,
    },
    NotificationRecorded {
        notification_id: String,
        channel: Channel,
        notification_type: String,
        status: NotificationStatus,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::JobRunCompleted { .. } => "job_run_completed",
            EngineEvent::JobDeleted { .. } => "job_deleted",
            EngineEvent::WorkflowFinished { .. } => "workflow_finished",
            EngineEvent::NotificationRecorded { .. } => "notification_recorded",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// No subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}
