use crate::{
    adapter::{SourceAdapter, StagePlan},
    context::MigrationContext,
    error::{HandlerError, MigrationError},
    inspect,
    lock::AdapterLocks,
    sequencer::{self, Advance, Stepped},
};
use async_trait::async_trait;
use chrono::Utc;
use engine_config::{
    config::EngineConfig,
    settings::{SettingsValidator, ValidationErrors},
};
use engine_core::{
    event_bus::bus::EventBus,
    mapping::IdResolver,
    progress::ProgressService,
    state::{
        checkpoint::{CheckpointStore, Commit},
        keys,
    },
};
use engine_processing::{
    error::BoxError,
    queue::{BatchQueue, JobHandler, Tick},
};
use model::{
    core::identifiers::AdapterId,
    events::{JobCompleted, MigrationAborted, MigrationCompleted, MigrationStarted},
    execution::{
        batch::{BatchJob, JobReport, JobStatus},
        settings::{BATCH_SIZE_KEY, ImportSettings, UploadedFile},
        task::{MigrationTask, Outcome, StageCounters},
    },
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settings as submitted to `start`, kept so a restarted process can
/// rebuild the adapter's typed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSettings {
    raw: ImportSettings,
    uploads: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartResponse {
    pub progress: u8,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResponse {
    pub progress: u8,
    pub message: String,
    /// Cursor to pass on the next poll.
    pub logs_shown: u64,
    pub logs: Vec<String>,
    pub in_progress: bool,
}

/// Polling control surface for one registered adapter.
pub struct MigrationController<A: SourceAdapter> {
    adapter: Arc<A>,
    plan: Arc<StagePlan<A>>,
    store: CheckpointStore,
    resolver: IdResolver,
    progress: ProgressService,
    queue: BatchQueue<A::Action, A::Item>,
    events: EventBus,
    locks: Arc<AdapterLocks>,
    config: EngineConfig,
    settings: Arc<Mutex<Option<(Arc<A::Settings>, Arc<ImportSettings>)>>>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl<A: SourceAdapter> Clone for MigrationController<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            plan: self.plan.clone(),
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            progress: self.progress.clone(),
            queue: self.queue.clone(),
            events: self.events.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<A: SourceAdapter> MigrationController<A> {
    pub(crate) fn new(
        adapter: A,
        plan: StagePlan<A>,
        store: CheckpointStore,
        events: EventBus,
        locks: Arc<AdapterLocks>,
        config: EngineConfig,
    ) -> Self {
        let mut resolver = IdResolver::new(store.clone());
        if let Some(index) = adapter.external_index() {
            resolver = resolver.with_index(index);
        }
        let progress = ProgressService::new(store.clone())
            .with_limits(config.log_retention, config.log_page_size);

        Self {
            adapter: Arc::new(adapter),
            plan: Arc::new(plan),
            queue: BatchQueue::new(store.clone()),
            store,
            resolver,
            progress,
            events,
            locks,
            config,
            settings: Arc::new(Mutex::new(None)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn adapter_id(&self) -> AdapterId {
        self.adapter.id()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn plan(&self) -> &StagePlan<A> {
        &self.plan
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn progress(&self) -> &ProgressService {
        &self.progress
    }

    pub fn resolver(&self) -> &IdResolver {
        &self.resolver
    }

    pub fn queue(&self) -> &BatchQueue<A::Action, A::Item> {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cached_settings(&self) -> Option<(Arc<A::Settings>, Arc<ImportSettings>)> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cache_settings(&self, value: Option<(Arc<A::Settings>, Arc<ImportSettings>)>) {
        *self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    }

    /// Engine-level keys first, then the adapter's own validation; all
    /// problems are reported together.
    fn validate(
        &self,
        raw: &ImportSettings,
        uploads: &[UploadedFile],
    ) -> Result<A::Settings, ValidationErrors> {
        let mut common = SettingsValidator::new(raw, uploads);
        common.dry_run();
        common.batch_size(self.config.batch_size);
        let common = common.finish(());

        match (common, self.adapter.validate_settings(raw, uploads)) {
            (Ok(()), Ok(settings)) => Ok(settings),
            (Err(mut a), Err(b)) => {
                a.0.extend(b.0);
                Err(a)
            }
            (Err(e), Ok(_)) | (Ok(()), Err(e)) => Err(e),
        }
    }

    fn batch_size(&self, raw: &ImportSettings) -> usize {
        raw.get_u64(BATCH_SIZE_KEY)
            .map(|n| n as usize)
            .unwrap_or(self.config.batch_size)
    }

    /// Typed settings of the current run, rebuilt from the store after a
    /// restart. `None` when no run was ever started.
    async fn load_settings(
        &self,
    ) -> Result<Option<(Arc<A::Settings>, Arc<ImportSettings>)>, MigrationError> {
        if let Some(cached) = self.cached_settings() {
            return Ok(Some(cached));
        }

        let stored = self
            .store
            .get_uncached_opt::<StoredSettings>(keys::SETTINGS)
            .await?;
        let Some(stored) = stored else {
            return Ok(None);
        };
        let typed = self.validate(&stored.raw, &stored.uploads)?;
        let pair = (Arc::new(typed), Arc::new(stored.raw));
        self.cache_settings(Some(pair.clone()));
        Ok(Some(pair))
    }

    async fn context(&self) -> Result<Option<MigrationContext<A>>, MigrationError> {
        let Some((settings, raw)) = self.load_settings().await? else {
            return Ok(None);
        };

        Ok(Some(MigrationContext {
            adapter: self.adapter.clone(),
            batch_size: self.batch_size(&raw),
            dry_run: raw.is_dry_run(),
            settings,
            raw_settings: raw,
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            progress: self.progress.clone(),
            queue: self.queue.clone(),
            events: self.events.clone(),
            cancel: self.cancel_token(),
        }))
    }

    /// Validates settings, resets the previous run (id mappings survive),
    /// seeds a task at the first stage and performs one advance.
    pub async fn start(
        &self,
        settings: ImportSettings,
        uploads: Vec<UploadedFile>,
    ) -> Result<StartResponse, MigrationError> {
        let typed = self.validate(&settings, &uploads)?;
        let id = self.adapter.id();
        let _guard = self.locks.acquire(&id).await;

        self.progress.reset().await?;
        self.queue.reset().await?;

        let dry_run = settings.is_dry_run();
        let first = self.plan.first();
        let mut task = MigrationTask::new(id.clone(), first);
        task.extra.dry_run = dry_run;

        let stored = StoredSettings {
            raw: settings.clone(),
            uploads,
        };
        let mut commit = Commit::new();
        commit
            .remove(keys::FINISHED)
            .remove(keys::COMPLETION_LOGGED)
            .set(keys::SETTINGS, &stored)?
            .set(keys::TASK, &task)?;
        self.store.commit(commit).await?;

        self.cache_settings(Some((Arc::new(typed), Arc::new(settings.clone()))));
        *self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            CancellationToken::new();

        let mode = if dry_run { " (dry run)" } else { "" };
        self.progress
            .info(format!("Starting {id} migration{mode} at stage {first}"))
            .await?;
        info!(adapter = %id, stage = %first, dry_run, "Migration started");
        self.events
            .publish(MigrationStarted {
                adapter_id: id,
                first_stage: first.to_string(),
                dry_run,
                timestamp: Utc::now(),
            })
            .await;

        let active = self.step().await?;
        let busy = self.queue.is_pending_or_running().await?;

        Ok(StartResponse {
            progress: self.progress.get_progress().await?,
            complete: !active && !busy,
        })
    }

    /// One sequencer step under the adapter lock. Returns whether a task is
    /// still active afterwards.
    pub async fn advance(&self) -> Result<bool, MigrationError> {
        let _guard = self.locks.acquire(&self.adapter.id()).await;
        self.step().await
    }

    async fn step(&self) -> Result<bool, MigrationError> {
        let Some(task) = self
            .store
            .get_uncached_opt::<MigrationTask<A::Stage>>(keys::TASK)
            .await?
        else {
            return Ok(false);
        };

        let Some(ctx) = self.context().await? else {
            warn!(adapter = %self.adapter.id(), "Task present without settings; discarding it");
            self.store.remove(keys::TASK).await?;
            return Ok(false);
        };

        let Stepped { next, counters } = sequencer::advance(&ctx, &self.plan, task).await?;

        let mut commit = Commit::new();
        ProgressService::stage_counters(&mut commit, &counters);

        if self.abort_requested(&ctx).await? {
            debug!(
                adapter = %self.adapter.id(),
                "Abort requested during advance; task not persisted"
            );
            self.store.commit(commit).await?;
            return Ok(false);
        }

        let active = match next {
            Advance::Continue(task) => {
                commit.set(keys::TASK, &task)?;
                true
            }
            Advance::Terminal => {
                commit.remove(keys::TASK).set(keys::FINISHED, &true)?;
                false
            }
        };
        self.store.commit(commit).await?;

        // An abort may have landed between the check and the commit.
        if self.abort_requested(&ctx).await? {
            debug!(adapter = %self.adapter.id(), "Abort landed while persisting; task discarded");
            self.store.remove(keys::TASK).await?;
            self.store.remove(keys::FINISHED).await?;
            return Ok(false);
        }
        Ok(active)
    }

    async fn abort_requested(&self, ctx: &MigrationContext<A>) -> Result<bool, MigrationError> {
        Ok(ctx.is_cancelled() || self.queue.control().is_cancel_requested().await?)
    }

    /// Advances an active task, appends the completion entry once nothing
    /// is left to do and returns the log delta after `logs_seen`.
    pub async fn poll(&self, logs_seen: u64) -> Result<PollResponse, MigrationError> {
        let active = self.advance().await?;
        let busy = self.queue.is_pending_or_running().await?;
        let in_progress = active || busy;

        if !in_progress {
            self.log_completion_once().await?;
        }

        let page = self.progress.get_logs(logs_seen).await?;
        let progress = self.progress.get_progress().await?;
        let message = match page.entries.last() {
            Some(entry) => entry.message.clone(),
            None if in_progress => format!("{progress}% complete"),
            None => "Idle".to_string(),
        };

        Ok(PollResponse {
            progress,
            message,
            logs_shown: page.cursor,
            logs: page.entries.iter().map(|e| e.render()).collect(),
            in_progress,
        })
    }

    async fn log_completion_once(&self) -> Result<(), MigrationError> {
        let finished: bool = self.store.get_uncached(keys::FINISHED, false).await?;
        let logged: bool = self.store.get_uncached(keys::COMPLETION_LOGGED, false).await?;
        if !finished || logged {
            return Ok(());
        }

        self.store.set(keys::COMPLETION_LOGGED, &true).await?;
        let totals = self.progress.totals().await?;
        self.progress
            .success(format!(
                "Migration completed: {} succeeded, {} failed, {} skipped",
                totals.succeeded, totals.failed, totals.skipped
            ))
            .await?;
        self.events
            .publish(MigrationCompleted {
                adapter_id: self.adapter.id(),
                totals,
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    /// Cooperative stop. Does not wait for the adapter lock: an in-flight job
    /// finishes and records its counters, queued jobs never run.
    pub async fn abort(&self) -> Result<bool, MigrationError> {
        self.cancel_token().cancel();

        let had_task = self.store.exists(keys::TASK).await?;
        let had_jobs = self.queue.abort().await?;
        self.store.remove(keys::TASK).await?;
        self.store.remove(keys::FINISHED).await?;

        self.progress.warn("Migration aborted").await?;
        info!(adapter = %self.adapter.id(), had_task, had_jobs, "Migration aborted");
        self.events
            .publish(MigrationAborted {
                adapter_id: self.adapter.id(),
                timestamp: Utc::now(),
            })
            .await;

        Ok(had_task || had_jobs)
    }

    /// Runs at most one queued job under the adapter lock. Returns whether a
    /// job was consumed.
    pub async fn drain_tick(&self) -> Result<bool, MigrationError> {
        let _guard = self.locks.acquire(&self.adapter.id()).await;

        let Some(ctx) = self.context().await? else {
            return Ok(false);
        };
        let dispatcher = JobDispatcher { ctx: &ctx };

        match self.queue.drain_tick(&dispatcher).await? {
            Tick::Ran {
                seq,
                action,
                items,
                report,
            } => {
                debug!(adapter = %self.adapter.id(), seq, %action, items, "Batch job finished");
                self.events
                    .publish(JobCompleted {
                        adapter_id: self.adapter.id(),
                        seq,
                        action: action.to_string(),
                        counters: report.counters,
                        timestamp: Utc::now(),
                    })
                    .await;
                Ok(true)
            }
            Tick::Purged(n) => {
                self.progress
                    .warn(format!("Discarded {n} queued batch(es) after abort"))
                    .await?;
                Ok(false)
            }
            Tick::Idle => Ok(false),
        }
    }

    pub async fn is_in_progress(&self) -> Result<bool, MigrationError> {
        Ok(self.store.exists(keys::TASK).await? || self.queue.is_pending_or_running().await?)
    }

    pub async fn current_task(&self) -> Result<Option<MigrationTask<A::Stage>>, MigrationError> {
        Ok(self.store.get_uncached_opt(keys::TASK).await?)
    }

    /// Polls and drains until nothing is left, collecting every rendered log
    /// line. Used by headless runs and tests.
    pub async fn run_to_completion(&self) -> Result<Vec<String>, MigrationError> {
        let mut cursor = 0;
        let mut lines = Vec::new();
        loop {
            let response = self.poll(cursor).await?;
            cursor = response.logs_shown;
            lines.extend(response.logs);
            if !response.in_progress {
                // Entries appended after the page was read (completion line).
                loop {
                    let page = self.progress.get_logs(cursor).await?;
                    if page.entries.is_empty() {
                        break;
                    }
                    cursor = page.cursor;
                    lines.extend(page.entries.iter().map(|e| e.render()));
                }
                return Ok(lines);
            }
            while self.drain_tick().await? {}
        }
    }

    /// Drops run state. With `keep_mappings` the id maps survive so a later
    /// run still updates instead of duplicating.
    pub async fn reset(&self, keep_mappings: bool) -> Result<(), MigrationError> {
        self.cancel_token().cancel();
        let _guard = self.locks.acquire(&self.adapter.id()).await;

        inspect::reset_stored(&self.store, keep_mappings).await?;
        self.cache_settings(None);
        info!(adapter = %self.adapter.id(), keep_mappings, "Adapter state reset");
        Ok(())
    }
}

/// Routes queue jobs to the adapter. The queue commits the returned
/// counters together with the job's removal.
struct JobDispatcher<'a, A: SourceAdapter> {
    ctx: &'a MigrationContext<A>,
}

#[async_trait]
impl<'a, A: SourceAdapter> JobHandler<A::Action, A::Item> for JobDispatcher<'a, A> {
    async fn handle(&self, job: &BatchJob<A::Action, A::Item>) -> Result<JobReport, BoxError> {
        let mut counters = StageCounters::default();

        let status = match self.ctx.adapter().run_job(self.ctx, job, &mut counters).await {
            Ok(status) => status,
            Err(HandlerError::Stage { message }) => {
                let remaining = (job.items.len() as u64).saturating_sub(counters.processed());
                counters.add(Outcome::Failed, remaining);
                self.ctx
                    .progress()
                    .error(format!("Batch {} ({}) failed: {message}", job.seq, job.action))
                    .await?;
                JobStatus::Done
            }
            Err(HandlerError::System(e)) => return Err(e),
        };

        Ok(JobReport { status, counters })
    }
}
