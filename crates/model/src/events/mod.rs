use crate::{
    core::identifiers::AdapterId,
    execution::task::{RunTotals, StageCounters},
};
use std::fmt::Debug;

/// A trait for events that can be published on the EventBus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// Emitted when `start` seeds a fresh task.
#[derive(Debug, Clone)]
pub struct MigrationStarted {
    pub adapter_id: AdapterId,
    pub first_stage: String,
    pub dry_run: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event for MigrationStarted {
    fn event_type(&self) -> &'static str {
        "migration.started"
    }
}

/// Emitted when a stage reports exhaustion. `to` is `None` when the last
/// declared stage finished.
#[derive(Debug, Clone)]
pub struct StageAdvanced {
    pub adapter_id: AdapterId,
    pub from: String,
    pub to: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event for StageAdvanced {
    fn event_type(&self) -> &'static str {
        "stage.advanced"
    }
}

/// Emitted when a stage defers work to the batch queue.
#[derive(Debug, Clone)]
pub struct BatchEnqueued {
    pub adapter_id: AdapterId,
    pub action: String,
    pub jobs: usize,
    pub items: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event for BatchEnqueued {
    fn event_type(&self) -> &'static str {
        "batch.enqueued"
    }
}

/// Emitted after one queue tick ran a job.
#[derive(Debug, Clone)]
pub struct JobCompleted {
    pub adapter_id: AdapterId,
    pub seq: u64,
    pub action: String,
    pub counters: StageCounters,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event for JobCompleted {
    fn event_type(&self) -> &'static str {
        "job.completed"
    }
}

/// Emitted once per run, when every stage finished and the queue is empty.
#[derive(Debug, Clone)]
pub struct MigrationCompleted {
    pub adapter_id: AdapterId,
    pub totals: RunTotals,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event for MigrationCompleted {
    fn event_type(&self) -> &'static str {
        "migration.completed"
    }
}

/// Emitted when an operator aborts a run.
#[derive(Debug, Clone)]
pub struct MigrationAborted {
    pub adapter_id: AdapterId,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event for MigrationAborted {
    fn event_type(&self) -> &'static str {
        "migration.aborted"
    }
}
