mod worker;

use crate::{
    adapter::{SourceAdapter, StageHandler, StagePlan, StageStep},
    context::MigrationContext,
    controller::MigrationController,
    engine::Engine,
    error::{HandlerError, PlanError},
};
use async_trait::async_trait;
use engine_config::{config::EngineConfig, settings::ValidationErrors};
use engine_core::{
    error::StateStoreError,
    state::{Entry, StateStore, WriteOp, keys, sled_store::SledStateStore},
};
use model::{
    core::identifiers::AdapterId,
    execution::{
        batch::{BatchJob, JobStatus},
        settings::{ImportSettings, UploadedFile},
        task::{MigrationTask, Outcome, StageCounters},
    },
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum Letter {
    A,
    B,
    C,
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Touch {
    Touch,
}

impl fmt::Display for Touch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("touch")
    }
}

pub(crate) type PlanFn = Box<dyn Fn() -> Result<StagePlan<Toy>, PlanError> + Send + Sync>;

/// Minimal adapter whose stages are supplied by each test.
pub(crate) struct Toy {
    pub id: &'static str,
    pub total: u64,
    pub plan: PlanFn,
    pub counted: Arc<AtomicUsize>,
    pub jobs_run: Arc<AtomicUsize>,
    pub count_error: Option<&'static str>,
}

impl Toy {
    pub fn new(
        total: u64,
        plan: impl Fn() -> Result<StagePlan<Toy>, PlanError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: "toy",
            total,
            plan: Box::new(plan),
            counted: Arc::new(AtomicUsize::new(0)),
            jobs_run: Arc::new(AtomicUsize::new(0)),
            count_error: None,
        }
    }
}

#[async_trait]
impl SourceAdapter for Toy {
    type Stage = Letter;
    type Settings = ();
    type Action = Touch;
    type Item = u64;

    fn id(&self) -> AdapterId {
        AdapterId::new(self.id)
    }

    fn plan(&self) -> Result<StagePlan<Self>, PlanError> {
        (self.plan)()
    }

    fn validate_settings(
        &self,
        raw: &ImportSettings,
        _uploads: &[UploadedFile],
    ) -> Result<(), ValidationErrors> {
        if raw.contains("reject") {
            return Err(ValidationErrors::single("reject", "not accepted"));
        }
        Ok(())
    }

    async fn count_total_items(&self, _ctx: &MigrationContext<Self>) -> Result<u64, HandlerError> {
        self.counted.fetch_add(1, Ordering::SeqCst);
        match self.count_error {
            Some(message) => Err(HandlerError::stage(message)),
            None => Ok(self.total),
        }
    }

    async fn run_job(
        &self,
        _ctx: &MigrationContext<Self>,
        job: &BatchJob<Touch, u64>,
        counters: &mut StageCounters,
    ) -> Result<JobStatus, HandlerError> {
        self.jobs_run.fetch_add(1, Ordering::SeqCst);
        counters.add(Outcome::Imported, job.items.len() as u64);
        Ok(JobStatus::Done)
    }
}

/// Imports `page` items per call until `total` is reached.
pub(crate) struct PageThrough {
    pub total: u64,
    pub page: u64,
    pub reset_on_exit: bool,
}

#[async_trait]
impl StageHandler<Toy> for PageThrough {
    async fn advance(
        &self,
        _ctx: &MigrationContext<Toy>,
        task: &mut MigrationTask<Letter>,
    ) -> Result<StageStep, HandlerError> {
        let n = self.page.min(self.total.saturating_sub(task.offset));
        task.call.add(Outcome::Imported, n);
        task.advance_offset(n);

        if task.offset >= self.total {
            Ok(StageStep::Next {
                reset_offset: self.reset_on_exit,
            })
        } else {
            Ok(StageStep::More)
        }
    }
}

/// Exhausted immediately.
pub(crate) struct Empty;

#[async_trait]
impl StageHandler<Toy> for Empty {
    async fn advance(
        &self,
        _ctx: &MigrationContext<Toy>,
        _task: &mut MigrationTask<Letter>,
    ) -> Result<StageStep, HandlerError> {
        Ok(StageStep::next())
    }
}

/// Source table missing.
pub(crate) struct Broken;

#[async_trait]
impl StageHandler<Toy> for Broken {
    async fn advance(
        &self,
        _ctx: &MigrationContext<Toy>,
        task: &mut MigrationTask<Letter>,
    ) -> Result<StageStep, HandlerError> {
        task.record(Outcome::Failed);
        Err(HandlerError::stage("table toy_items does not exist"))
    }
}

/// Fails with an infrastructure error for the first `failures` calls.
pub(crate) struct Flaky {
    pub failures: AtomicUsize,
}

#[async_trait]
impl StageHandler<Toy> for Flaky {
    async fn advance(
        &self,
        _ctx: &MigrationContext<Toy>,
        task: &mut MigrationTask<Letter>,
    ) -> Result<StageStep, HandlerError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(HandlerError::system("connection reset"));
        }
        task.record(Outcome::Imported);
        task.advance_offset(1);
        Ok(StageStep::next())
    }
}

/// Jumps forward once, then tries to move back.
pub(crate) struct Backwards;

#[async_trait]
impl StageHandler<Toy> for Backwards {
    async fn advance(
        &self,
        _ctx: &MigrationContext<Toy>,
        task: &mut MigrationTask<Letter>,
    ) -> Result<StageStep, HandlerError> {
        if task.offset == 0 {
            task.advance_offset(5);
        } else {
            task.offset -= 1;
        }
        Ok(StageStep::More)
    }
}

/// Defers `total` items to the batch queue in one call.
pub(crate) struct Fanout {
    pub total: u64,
}

#[async_trait]
impl StageHandler<Toy> for Fanout {
    async fn advance(
        &self,
        ctx: &MigrationContext<Toy>,
        _task: &mut MigrationTask<Letter>,
    ) -> Result<StageStep, HandlerError> {
        ctx.defer(Touch::Touch, (0..self.total).collect()).await?;
        Ok(StageStep::next())
    }
}

/// Sled store that can be told to fail, or to see an abort land, on the
/// next commits that persist the task.
pub(crate) struct Interfering {
    inner: SledStateStore,
    fail_task_commits: AtomicUsize,
    abort_on_task_commit: AtomicBool,
}

impl Interfering {
    pub fn open(dir: &std::path::Path) -> Self {
        Self {
            inner: SledStateStore::open(dir).unwrap(),
            fail_task_commits: AtomicUsize::new(0),
            abort_on_task_commit: AtomicBool::new(false),
        }
    }

    pub fn fail_next_task_commits(&self, n: usize) {
        self.fail_task_commits.store(n, Ordering::SeqCst);
    }

    pub fn abort_on_next_task_commit(&self) {
        self.abort_on_task_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for Interfering {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>, StateStoreError> {
        self.inner.get(scope, key).await
    }
    async fn set(&self, scope: &str, key: &str, value: &[u8]) -> Result<(), StateStoreError> {
        self.inner.set(scope, key, value).await
    }
    async fn set_many(&self, scope: &str, entries: &[Entry]) -> Result<(), StateStoreError> {
        self.inner.set_many(scope, entries).await
    }
    async fn remove(&self, scope: &str, key: &str) -> Result<(), StateStoreError> {
        self.inner.remove(scope, key).await
    }
    async fn scan_prefix(&self, scope: &str, prefix: &str) -> Result<Vec<Entry>, StateStoreError> {
        self.inner.scan_prefix(scope, prefix).await
    }
    async fn scan_after(
        &self,
        scope: &str,
        prefix: &str,
        after: &str,
        limit: usize,
    ) -> Result<Vec<Entry>, StateStoreError> {
        self.inner.scan_after(scope, prefix, after, limit).await
    }
    async fn first_with_prefix(
        &self,
        scope: &str,
        prefix: &str,
    ) -> Result<Option<Entry>, StateStoreError> {
        self.inner.first_with_prefix(scope, prefix).await
    }
    async fn remove_prefix(&self, scope: &str, prefix: &str) -> Result<usize, StateStoreError> {
        self.inner.remove_prefix(scope, prefix).await
    }
    async fn increment(&self, scope: &str, key: &str, by: u64) -> Result<u64, StateStoreError> {
        self.inner.increment(scope, key, by).await
    }
    async fn commit(&self, scope: &str, ops: &[WriteOp]) -> Result<(), StateStoreError> {
        let persists_task = ops
            .iter()
            .any(|op| matches!(op, WriteOp::Set(..)) && op.key() == keys::TASK);
        if persists_task {
            let failing = self
                .fail_task_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StateStoreError::CorruptCounter {
                    key: keys::TASK.to_string(),
                });
            }
            if self.abort_on_task_commit.swap(false, Ordering::SeqCst) {
                self.inner.set(scope, keys::QUEUE_CANCEL, b"true").await?;
            }
        }
        self.inner.commit(scope, ops).await
    }
    async fn clear(&self, scope: &str) -> Result<(), StateStoreError> {
        self.inner.clear(scope).await
    }
    async fn scopes(&self) -> Result<Vec<String>, StateStoreError> {
        self.inner.scopes().await
    }
    async fn flush(&self) -> Result<(), StateStoreError> {
        self.inner.flush().await
    }
}

pub(crate) struct Harness {
    pub engine: Engine,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();
        Self::with_store(Arc::new(store), dir)
    }

    pub fn with_store(store: Arc<dyn StateStore>, dir: TempDir) -> Self {
        let engine = Engine::with_store(store, EngineConfig::with_state_dir(dir.path()));
        Self { engine, _dir: dir }
    }

    pub fn register(&self, toy: Toy) -> MigrationController<Toy> {
        self.engine.register(toy).unwrap()
    }
}

pub(crate) fn abc(
    total: u64,
    page: u64,
    reset_on_exit: bool,
) -> impl Fn() -> Result<StagePlan<Toy>, PlanError> + Send + Sync {
    move || {
        StagePlan::builder()
            .stage(
                Letter::A,
                PageThrough {
                    total,
                    page,
                    reset_on_exit,
                },
            )
            .stage(Letter::B, Empty)
            .stage(Letter::C, Empty)
            .build()
    }
}
