use crate::error::MigrationError;
use engine_core::{
    progress::{ProgressService, ProgressSnapshot},
    state::{checkpoint::CheckpointStore, keys},
};
use engine_processing::queue::QueueControl;
use model::execution::task::{StageCounters, TaskExtra};
use serde::{Deserialize, Serialize};

/// Stage-agnostic view of a stored task, readable without the adapter's
/// stage enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub stage: serde_json::Value,
    pub offset: u64,
    pub call: StageCounters,
    pub extra: TaskExtra,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatus {
    pub task: Option<TaskView>,
    pub progress: ProgressSnapshot,
    pub pending_jobs: usize,
    pub job_running: bool,
    pub abort_requested: bool,
    pub finished: bool,
}

impl AdapterStatus {
    pub async fn load(store: &CheckpointStore) -> Result<Self, MigrationError> {
        let progress = ProgressService::new(store.clone());
        let queue = QueueControl::new(store.clone());

        Ok(Self {
            task: store.get_uncached_opt(keys::TASK).await?,
            progress: progress.snapshot().await?,
            pending_jobs: queue.pending().await?,
            job_running: queue.is_running().await?,
            abort_requested: queue.is_cancel_requested().await?,
            finished: store.get_uncached(keys::FINISHED, false).await?,
        })
    }

    pub fn in_progress(&self) -> bool {
        self.task.is_some() || self.job_running || (!self.abort_requested && self.pending_jobs > 0)
    }

    pub fn stage_label(&self) -> String {
        match self.task.as_ref().map(|t| &t.stage) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None if self.finished => "finished".to_string(),
            None => "idle".to_string(),
        }
    }
}

/// Operator-side abort for an adapter this process has no controller for:
/// flags the queue and drops the task. A live controller notices on its
/// next step.
pub async fn abort_stored(store: &CheckpointStore) -> Result<bool, MigrationError> {
    let had_task = store.exists(keys::TASK).await?;
    let had_jobs = QueueControl::new(store.clone()).abort().await?;
    store.remove(keys::TASK).await?;
    store.remove(keys::FINISHED).await?;
    ProgressService::new(store.clone())
        .warn("Migration aborted by operator")
        .await?;
    Ok(had_task || had_jobs)
}

/// Clears an adapter's stored state; `keep_mappings` preserves id maps.
pub async fn reset_stored(
    store: &CheckpointStore,
    keep_mappings: bool,
) -> Result<(), MigrationError> {
    if !keep_mappings {
        // The log sequence outlives the scope so cursors held by a UI stay valid.
        let log_seq: u64 = store.get_uncached(keys::LOG_SEQ, 0).await?;
        store.clear().await?;
        if log_seq > 0 {
            store.increment(keys::LOG_SEQ, log_seq).await?;
        }
        return Ok(());
    }

    for key in [keys::TASK, keys::SETTINGS, keys::FINISHED, keys::COMPLETION_LOGGED] {
        store.remove(key).await?;
    }
    ProgressService::new(store.clone()).reset().await?;
    QueueControl::new(store.clone()).reset().await?;
    Ok(())
}
