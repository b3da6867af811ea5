use crate::error::{BoxError, QueueError};
use async_trait::async_trait;
use chrono::Utc;
use engine_config::config::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use engine_core::{
    progress::ProgressService,
    state::{
        checkpoint::{CheckpointStore, Commit},
        keys,
    },
};
use model::execution::batch::{BatchJob, JobAction, JobItem, JobReport, JobStatus};
use std::marker::PhantomData;
use tracing::{debug, info};

pub mod control;

pub use control::QueueControl;

/// Runs one batch job. Item-level failures belong in the returned counters;
/// an `Err` means infrastructure trouble and leaves the job queued.
#[async_trait]
pub trait JobHandler<A: JobAction, T: JobItem>: Send + Sync {
    async fn handle(&self, job: &BatchJob<A, T>) -> Result<JobReport, BoxError>;
}

/// What one call to [`BatchQueue::drain_tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick<A> {
    Idle,
    /// An abort was pending; queued jobs were dropped without running.
    Purged(usize),
    Ran {
        seq: u64,
        action: A,
        items: usize,
        report: JobReport,
    },
}

impl<A> Tick<A> {
    pub fn consumed(&self) -> bool {
        matches!(self, Tick::Ran { .. })
    }
}

/// Durable FIFO of batch jobs in one adapter's checkpoint scope.
pub struct BatchQueue<A, T> {
    control: QueueControl,
    _marker: PhantomData<fn() -> (A, T)>,
}

impl<A, T> Clone for BatchQueue<A, T> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            _marker: PhantomData,
        }
    }
}

pub fn validate_batch_size(size: usize) -> Result<(), QueueError> {
    if (MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(QueueError::InvalidBatchSize {
            size,
            min: MIN_BATCH_SIZE,
            max: MAX_BATCH_SIZE,
        })
    }
}

impl<A: JobAction, T: JobItem> BatchQueue<A, T> {
    pub fn new(store: CheckpointStore) -> Self {
        Self {
            control: QueueControl::new(store),
            _marker: PhantomData,
        }
    }

    pub fn control(&self) -> &QueueControl {
        &self.control
    }

    fn store(&self) -> &CheckpointStore {
        self.control.store()
    }

    /// Appends jobs in order with a single atomic write. Returns the
    /// assigned sequence numbers.
    pub async fn enqueue(&self, jobs: Vec<(A, Vec<T>)>) -> Result<Vec<u64>, QueueError> {
        let jobs: Vec<_> = jobs.into_iter().filter(|(_, items)| !items.is_empty()).collect();
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let last = self.store().increment(keys::QUEUE_SEQ, jobs.len() as u64).await?;
        let first = last + 1 - jobs.len() as u64;
        let now = Utc::now();

        let entries: Vec<(String, BatchJob<A, T>)> = jobs
            .into_iter()
            .zip(first..=last)
            .map(|((action, items), seq)| {
                let job = BatchJob {
                    seq,
                    action,
                    items,
                    enqueued_at: now,
                };
                (keys::queue_job(seq), job)
            })
            .collect();

        self.store().set_many(&entries).await?;
        debug!(adapter = %self.store().scope(), first, last, "Enqueued batch jobs");
        Ok((first..=last).collect())
    }

    /// Splits `items` into `ceil(n / batch_size)` jobs of one action,
    /// preserving order. Returns the number of jobs created.
    pub async fn enqueue_chunked(
        &self,
        action: A,
        items: Vec<T>,
        batch_size: usize,
    ) -> Result<usize, QueueError> {
        validate_batch_size(batch_size)?;

        let jobs: Vec<(A, Vec<T>)> = items
            .chunks(batch_size)
            .map(|chunk| (action, chunk.to_vec()))
            .collect();
        let count = jobs.len();
        self.enqueue(jobs).await?;
        Ok(count)
    }

    pub async fn head(&self) -> Result<Option<BatchJob<A, T>>, QueueError> {
        Ok(self
            .store()
            .first::<BatchJob<A, T>>(keys::QUEUE_JOB_PREFIX)
            .await?
            .map(|(_, job)| job))
    }

    pub async fn jobs(&self) -> Result<Vec<BatchJob<A, T>>, QueueError> {
        Ok(self
            .store()
            .scan::<BatchJob<A, T>>(keys::QUEUE_JOB_PREFIX)
            .await?
            .into_iter()
            .map(|(_, job)| job)
            .collect())
    }

    pub async fn pending(&self) -> Result<usize, QueueError> {
        Ok(self.control.pending().await?)
    }

    pub async fn is_pending_or_running(&self) -> Result<bool, QueueError> {
        Ok(self.control.is_pending_or_running().await?)
    }

    pub async fn abort(&self) -> Result<bool, QueueError> {
        Ok(self.control.abort().await?)
    }

    pub async fn reset(&self) -> Result<(), QueueError> {
        Ok(self.control.reset().await?)
    }

    /// Runs at most one job: the head of the queue. Callers serialize ticks
    /// per adapter.
    ///
    /// The job's removal and its counters are committed together, so a
    /// crash never leaves a finished job queued with its items counted.
    pub async fn drain_tick(&self, handler: &dyn JobHandler<A, T>) -> Result<Tick<A>, QueueError> {
        // Marked running before the cancel flag is read. `abort` writes the
        // flag before it reads the marker, so one side always sees the other.
        self.control.set_running(true).await?;

        let job = match self.claim().await {
            Ok(Claim::Run(job)) => job,
            Ok(Claim::Skip(tick)) => {
                self.control.set_running(false).await?;
                return Ok(tick);
            }
            Err(err) => {
                self.control.set_running(false).await?;
                return Err(err);
            }
        };

        let report = match handler.handle(&job).await {
            Ok(report) => report,
            Err(source) => {
                self.control.set_running(false).await?;
                return Err(QueueError::Handler {
                    seq: job.seq,
                    action: job.action.to_string(),
                    source,
                });
            }
        };

        let mut commit = Commit::new();
        ProgressService::stage_counters(&mut commit, &report.counters);
        if report.status == JobStatus::Done {
            commit.remove(&keys::queue_job(job.seq));
        }
        let committed = self.store().commit(commit).await;
        self.control.set_running(false).await?;
        committed?;

        if self.control.is_cancel_requested().await? {
            info!(
                adapter = %self.store().scope(),
                seq = job.seq,
                "Job finished after abort request"
            );
            self.control.purge().await?;
        }

        Ok(Tick::Ran {
            seq: job.seq,
            action: job.action,
            items: job.items.len(),
            report,
        })
    }

    /// Picks the job to run, or purges the queue when an abort is pending.
    async fn claim(&self) -> Result<Claim<A, T>, QueueError> {
        let head = self.head().await?;

        if self.control.is_cancel_requested().await? {
            let purged = self.control.purge().await?;
            return Ok(Claim::Skip(if purged > 0 { Tick::Purged(purged) } else { Tick::Idle }));
        }

        let Some(job) = head else {
            return Ok(Claim::Skip(Tick::Idle));
        };
        if !self.store().exists(&keys::queue_job(job.seq)).await? {
            debug!(
                adapter = %self.store().scope(),
                seq = job.seq,
                "Head job vanished before dispatch"
            );
            return Ok(Claim::Skip(Tick::Idle));
        }
        Ok(Claim::Run(job))
    }
}

enum Claim<A, T> {
    Run(BatchJob<A, T>),
    Skip(Tick<A>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{
        error::StateStoreError,
        state::{Entry, StateStore, WriteOp, sled_store::SledStateStore},
    };
    use model::{
        core::identifiers::AdapterId,
        execution::task::{Outcome, StageCounters},
    };
    use serde::{Deserialize, Serialize};
    use std::{
        fmt,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tempfile::tempdir;
    use tokio::time::{Duration, sleep};

    /// Returns the queue head as read, then stalls before handing it back,
    /// so a concurrent abort lands between the read and the dispatch.
    struct SlowHead {
        inner: SledStateStore,
        stall: Duration,
    }

    #[async_trait]
    impl StateStore for SlowHead {
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
        async fn scan_prefix(
            &self,
            scope: &str,
            prefix: &str,
        ) -> Result<Vec<Entry>, StateStoreError> {
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
            let head = self.inner.first_with_prefix(scope, prefix).await?;
            sleep(self.stall).await;
            Ok(head)
        }
        async fn remove_prefix(&self, scope: &str, prefix: &str) -> Result<usize, StateStoreError> {
            self.inner.remove_prefix(scope, prefix).await
        }
        async fn increment(&self, scope: &str, key: &str, by: u64) -> Result<u64, StateStoreError> {
            self.inner.increment(scope, key, by).await
        }
        async fn commit(&self, scope: &str, ops: &[WriteOp]) -> Result<(), StateStoreError> {
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

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    enum Action {
        Import,
    }

    impl fmt::Display for Action {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("import")
        }
    }

    struct CountingHandler {
        seen: AtomicUsize,
        reschedule_first: bool,
    }

    #[async_trait]
    impl JobHandler<Action, u32> for CountingHandler {
        async fn handle(&self, job: &BatchJob<Action, u32>) -> Result<JobReport, BoxError> {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            let mut counters = StageCounters::default();
            counters.add(Outcome::Imported, job.items.len() as u64);
            let status = if self.reschedule_first && n == 0 {
                JobStatus::Reschedule
            } else {
                JobStatus::Done
            };
            Ok(JobReport { status, counters })
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler<Action, u32> for FailingHandler {
        async fn handle(&self, _job: &BatchJob<Action, u32>) -> Result<JobReport, BoxError> {
            Err("destination offline".into())
        }
    }

    fn queue(dir: &std::path::Path) -> BatchQueue<Action, u32> {
        let backend: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir).unwrap());
        BatchQueue::new(CheckpointStore::new(backend, AdapterId::new("dir")))
    }

    fn handler() -> CountingHandler {
        CountingHandler {
            seen: AtomicUsize::new(0),
            reschedule_first: false,
        }
    }

    #[tokio::test]
    async fn ten_thousand_items_become_two_hundred_jobs() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());

        let jobs = queue
            .enqueue_chunked(Action::Import, (0..10_000).collect(), 50)
            .await
            .unwrap();
        assert_eq!(jobs, 200);
        assert_eq!(queue.pending().await.unwrap(), 200);

        let handler = handler();
        let mut processed = 0;
        loop {
            match queue.drain_tick(&handler).await.unwrap() {
                Tick::Ran { report, .. } => processed += report.counters.processed(),
                Tick::Idle => break,
                Tick::Purged(_) => unreachable!(),
            }
        }
        assert_eq!(processed, 10_000);
        assert!(!queue.is_pending_or_running().await.unwrap());

        let totals = ProgressService::new(queue.control().store().clone()).totals().await.unwrap();
        assert_eq!(totals.succeeded, 10_000);
    }

    #[tokio::test]
    async fn chunks_keep_submission_order_and_sizes() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());

        queue.enqueue_chunked(Action::Import, (0..120).collect(), 50).await.unwrap();
        let jobs = queue.jobs().await.unwrap();

        assert_eq!(jobs.iter().map(|j| j.len()).collect::<Vec<_>>(), vec![50, 50, 20]);
        assert_eq!(jobs[0].items[0], 0);
        assert_eq!(jobs[2].items[19], 119);
        assert!(jobs.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn batch_size_outside_bounds_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());

        for size in [0, 9, 51] {
            let err = queue.enqueue_chunked(Action::Import, vec![1, 2, 3], size).await.unwrap_err();
            assert!(matches!(err, QueueError::InvalidBatchSize { .. }));
        }
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rescheduled_job_stays_at_head() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());
        queue.enqueue(vec![(Action::Import, vec![1]), (Action::Import, vec![2])]).await.unwrap();

        let handler = CountingHandler {
            seen: AtomicUsize::new(0),
            reschedule_first: true,
        };

        let first = queue.drain_tick(&handler).await.unwrap();
        let second = queue.drain_tick(&handler).await.unwrap();
        match (first, second) {
            (Tick::Ran { seq: a, .. }, Tick::Ran { seq: b, .. }) => assert_eq!(a, b),
            other => panic!("unexpected ticks: {other:?}"),
        }
        assert_eq!(queue.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn handler_failure_keeps_the_job() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());
        queue.enqueue(vec![(Action::Import, vec![1])]).await.unwrap();

        let err = queue.drain_tick(&FailingHandler).await.unwrap_err();
        assert!(matches!(err, QueueError::Handler { seq: 1, .. }));
        assert_eq!(queue.pending().await.unwrap(), 1);
        assert!(!queue.control().is_running().await.unwrap());
    }

    #[tokio::test]
    async fn abort_while_idle_purges_immediately() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());
        queue.enqueue_chunked(Action::Import, (0..100).collect(), 10).await.unwrap();

        assert!(queue.abort().await.unwrap());
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert!(!queue.is_pending_or_running().await.unwrap());
        assert_eq!(queue.drain_tick(&handler()).await.unwrap(), Tick::Idle);
    }

    #[tokio::test]
    async fn abort_during_head_read_runs_nothing() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn StateStore> = Arc::new(SlowHead {
            inner: SledStateStore::open(dir.path()).unwrap(),
            stall: Duration::from_millis(50),
        });
        let queue: BatchQueue<Action, u32> =
            BatchQueue::new(CheckpointStore::new(backend, AdapterId::new("dir")));
        queue.enqueue_chunked(Action::Import, (0..30).collect(), 10).await.unwrap();

        let handler = Arc::new(handler());
        let tick = tokio::spawn({
            let queue = queue.clone();
            let handler = handler.clone();
            async move { queue.drain_tick(handler.as_ref()).await }
        });

        sleep(Duration::from_millis(10)).await;
        assert!(queue.abort().await.unwrap());

        assert_eq!(tick.await.unwrap().unwrap(), Tick::Purged(3));
        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert!(!queue.is_pending_or_running().await.unwrap());
    }

    #[tokio::test]
    async fn rescheduled_job_still_counts_its_items() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());
        queue.enqueue(vec![(Action::Import, vec![1, 2])]).await.unwrap();

        let handler = CountingHandler {
            seen: AtomicUsize::new(0),
            reschedule_first: true,
        };
        queue.drain_tick(&handler).await.unwrap();

        let totals = ProgressService::new(queue.control().store().clone()).totals().await.unwrap();
        assert_eq!(totals.succeeded, 2);
        assert_eq!(queue.pending().await.unwrap(), 1);
        assert!(!queue.control().is_running().await.unwrap());
    }

    #[tokio::test]
    async fn reset_clears_abort_flag() {
        let dir = tempdir().unwrap();
        let queue = queue(dir.path());
        queue.abort().await.unwrap();
        queue.reset().await.unwrap();

        queue.enqueue(vec![(Action::Import, vec![7])]).await.unwrap();
        assert!(queue.is_pending_or_running().await.unwrap());
        assert!(queue.drain_tick(&handler()).await.unwrap().consumed());
    }
}
