use engine_core::{
    error::StateStoreError,
    state::{checkpoint::CheckpointStore, keys},
};
use tracing::{debug, info};

/// Queue flags that do not depend on the adapter's job types, so operator
/// tooling can inspect and abort any stored adapter.
///
/// Flags are always read uncached: the worker, the controller and the CLI
/// each hold their own handle.
#[derive(Clone)]
pub struct QueueControl {
    store: CheckpointStore,
}

impl QueueControl {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub async fn is_cancel_requested(&self) -> Result<bool, StateStoreError> {
        self.store.get_uncached(keys::QUEUE_CANCEL, false).await
    }

    pub async fn is_running(&self) -> Result<bool, StateStoreError> {
        self.store.get_uncached(keys::QUEUE_RUNNING, false).await
    }

    pub async fn pending(&self) -> Result<usize, StateStoreError> {
        self.store.count(keys::QUEUE_JOB_PREFIX).await
    }

    /// True while a job is executing, or jobs are waiting and no abort was
    /// requested.
    pub async fn is_pending_or_running(&self) -> Result<bool, StateStoreError> {
        if self.is_running().await? {
            return Ok(true);
        }
        if self.is_cancel_requested().await? {
            return Ok(false);
        }
        Ok(self.pending().await? > 0)
    }

    /// Requests a cooperative stop. Queued jobs are purged right away when
    /// nothing is executing; otherwise the running tick purges them once its
    /// job returns. Returns true if jobs or a running job were affected.
    pub async fn abort(&self) -> Result<bool, StateStoreError> {
        self.store.set(keys::QUEUE_CANCEL, &true).await?;

        if self.is_running().await? {
            info!(adapter = %self.store.scope(), "Abort requested while a job is running");
            return Ok(true);
        }

        Ok(self.purge().await? > 0)
    }

    pub async fn purge(&self) -> Result<usize, StateStoreError> {
        let purged = self.store.remove_prefix(keys::QUEUE_JOB_PREFIX).await?;
        if purged > 0 {
            info!(adapter = %self.store.scope(), purged, "Purged queued jobs");
        }
        Ok(purged)
    }

    pub(crate) async fn set_running(&self, running: bool) -> Result<(), StateStoreError> {
        if running {
            self.store.set(keys::QUEUE_RUNNING, &true).await
        } else {
            self.store.remove(keys::QUEUE_RUNNING).await
        }
    }

    /// Drops jobs and flags so a new run starts from an empty queue.
    pub async fn reset(&self) -> Result<(), StateStoreError> {
        self.store.remove_prefix(keys::QUEUE_JOB_PREFIX).await?;
        self.store.remove(keys::QUEUE_RUNNING).await?;
        self.store.remove(keys::QUEUE_CANCEL).await?;
        debug!(adapter = %self.store.scope(), "Queue reset");
        Ok(())
    }
}
