use crate::{adapter::SourceAdapter, error::HandlerError};
use chrono::Utc;
use engine_core::{
    error::{ItemError, UpsertError},
    event_bus::bus::EventBus,
    mapping::IdResolver,
    progress::ProgressService,
    state::checkpoint::CheckpointStore,
};
use engine_processing::queue::BatchQueue;
use model::{
    core::identifiers::{DestinationId, EntityKind, SourceId},
    events::BatchEnqueued,
    execution::{
        log::Severity,
        mapping::Namespace,
        settings::ImportSettings,
        task::{Outcome, StageCounters},
    },
};
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a stage handler or batch job of one migration may touch.
/// Built per call by the controller; nothing here is global.
pub struct MigrationContext<A: SourceAdapter> {
    pub(crate) adapter: Arc<A>,
    pub(crate) settings: Arc<A::Settings>,
    pub(crate) raw_settings: Arc<ImportSettings>,
    pub(crate) store: CheckpointStore,
    pub(crate) resolver: IdResolver,
    pub(crate) progress: ProgressService,
    pub(crate) queue: BatchQueue<A::Action, A::Item>,
    pub(crate) events: EventBus,
    pub(crate) batch_size: usize,
    pub(crate) dry_run: bool,
    pub(crate) cancel: CancellationToken,
}

impl<A: SourceAdapter> MigrationContext<A> {
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn settings(&self) -> &A::Settings {
        &self.settings
    }

    pub fn raw_settings(&self) -> &ImportSettings {
        &self.raw_settings
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn resolver(&self) -> &IdResolver {
        &self.resolver
    }

    pub fn progress(&self) -> &ProgressService {
        &self.progress
    }

    pub fn queue(&self) -> &BatchQueue<A::Action, A::Item> {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Handlers may poll this between items to stop early after an abort.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn side_table(&self, entity: impl Into<EntityKind>) -> Namespace {
        Namespace::side_table(self.adapter.id(), entity)
    }

    pub fn external_field(&self, entity: impl Into<EntityKind>) -> Namespace {
        Namespace::external_field(self.adapter.id(), entity)
    }

    /// Resolve-then-write for one source row, honouring dry-run. Item
    /// failures are logged and counted as failed; only infrastructure
    /// errors are returned.
    pub async fn upsert<C, CF, U, UF>(
        &self,
        namespace: &Namespace,
        source_id: &SourceId,
        counters: &mut StageCounters,
        create: C,
        update: U,
    ) -> Result<Outcome, HandlerError>
    where
        C: FnOnce() -> CF + Send,
        CF: Future<Output = Result<DestinationId, ItemError>> + Send,
        U: FnOnce(DestinationId) -> UF + Send,
        UF: Future<Output = Result<(), ItemError>> + Send,
    {
        match self
            .resolver
            .upsert(namespace, source_id, self.dry_run, create, update)
            .await
        {
            Ok(outcome) => {
                counters.record(outcome);
                Ok(outcome)
            }
            Err(UpsertError::Item(e)) => {
                self.item_failed(counters, &e).await?;
                Ok(Outcome::Failed)
            }
            Err(UpsertError::Mapping(e)) => Err(e.into()),
        }
    }

    pub async fn item_failed(
        &self,
        counters: &mut StageCounters,
        error: &ItemError,
    ) -> Result<(), HandlerError> {
        counters.record(Outcome::Failed);
        self.progress.error(error.to_string()).await?;
        Ok(())
    }

    pub async fn item_skipped(
        &self,
        counters: &mut StageCounters,
        reason: &str,
    ) -> Result<(), HandlerError> {
        counters.record(Outcome::Skipped);
        debug!(adapter = %self.adapter.id(), reason, "Skipped source item");
        Ok(())
    }

    /// Fans `items` into batch jobs of the run's batch size. Returns the
    /// number of jobs queued.
    pub async fn defer(
        &self,
        action: A::Action,
        items: Vec<A::Item>,
    ) -> Result<usize, HandlerError> {
        let count = items.len();
        if count == 0 {
            return Ok(0);
        }

        let jobs = self.queue.enqueue_chunked(action, items, self.batch_size).await?;
        self.progress
            .info(format!("Queued {count} {action} item(s) in {jobs} batch(es)"))
            .await?;
        self.events
            .publish(BatchEnqueued {
                adapter_id: self.adapter.id(),
                action: action.to_string(),
                jobs,
                items: count,
                timestamp: Utc::now(),
            })
            .await;
        Ok(jobs)
    }

    pub async fn log(
        &self,
        message: impl Into<String>,
        severity: Severity,
    ) -> Result<(), HandlerError> {
        self.progress.log(message, severity).await?;
        Ok(())
    }

    pub async fn info(&self, message: impl Into<String>) -> Result<(), HandlerError> {
        self.log(message, Severity::Info).await
    }

    pub async fn warn(&self, message: impl Into<String>) -> Result<(), HandlerError> {
        self.log(message, Severity::Warning).await
    }
}
