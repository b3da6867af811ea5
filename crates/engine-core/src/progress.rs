use crate::{
    error::ProgressError,
    state::{
        checkpoint::{CheckpointStore, Commit},
        keys,
    },
};
use chrono::Utc;
use model::execution::{
    log::{LogEntry, LogPage, Severity},
    task::{CounterKind, RunTotals, StageCounters},
};
use serde::Serialize;
use tracing::{error, info, warn};

pub const DEFAULT_LOG_RETENTION: usize = 5_000;
pub const DEFAULT_LOG_PAGE_SIZE: usize = 250;

/// Cumulative counters and the cursor-addressed run log of one adapter.
#[derive(Clone)]
pub struct ProgressService {
    store: CheckpointStore,
    retention: usize,
    page_size: usize,
}

/// Point-in-time view for operator tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub adapter_id: String,
    pub percent: u8,
    pub totals: RunTotals,
    pub last_log_seq: u64,
}

impl ProgressService {
    pub fn new(store: CheckpointStore) -> Self {
        Self {
            store,
            retention: DEFAULT_LOG_RETENTION,
            page_size: DEFAULT_LOG_PAGE_SIZE,
        }
    }

    pub fn with_limits(mut self, retention: usize, page_size: usize) -> Self {
        self.retention = retention.max(1);
        self.page_size = page_size.max(1);
        self
    }

    fn counter_key(kind: CounterKind) -> &'static str {
        match kind {
            CounterKind::Succeeded => keys::PROGRESS_SUCCEEDED,
            CounterKind::Failed => keys::PROGRESS_FAILED,
            CounterKind::Skipped => keys::PROGRESS_SKIPPED,
        }
    }

    pub async fn increase(&self, kind: CounterKind, n: u64) -> Result<u64, ProgressError> {
        Ok(self.store.increment(Self::counter_key(kind), n).await?)
    }

    /// Stages one call's counters so they land in the same commit as the
    /// checkpoint that accounts for them.
    pub fn stage_counters(commit: &mut Commit, counters: &StageCounters) {
        let deltas = [
            (CounterKind::Succeeded, counters.succeeded()),
            (CounterKind::Failed, counters.failed),
            (CounterKind::Skipped, counters.skipped),
        ];
        for (kind, n) in deltas {
            commit.increment(Self::counter_key(kind), n);
        }
    }

    /// Stores the expected total unless one is already recorded for this run.
    /// Returns the total in effect.
    pub async fn set_total_once(&self, total: u64) -> Result<u64, ProgressError> {
        if let Some(existing) = self.store.get_uncached_opt::<u64>(keys::PROGRESS_TOTAL).await? {
            return Ok(existing);
        }
        self.store.set(keys::PROGRESS_TOTAL, &total).await?;
        Ok(total)
    }

    pub async fn totals(&self) -> Result<RunTotals, ProgressError> {
        Ok(RunTotals {
            succeeded: self.store.get_uncached(keys::PROGRESS_SUCCEEDED, 0).await?,
            failed: self.store.get_uncached(keys::PROGRESS_FAILED, 0).await?,
            skipped: self.store.get_uncached(keys::PROGRESS_SKIPPED, 0).await?,
            total_expected: self.store.get_uncached_opt(keys::PROGRESS_TOTAL).await?,
        })
    }

    pub async fn get_progress(&self) -> Result<u8, ProgressError> {
        Ok(self.totals().await?.percent())
    }

    pub async fn log(
        &self,
        message: impl Into<String>,
        severity: Severity,
    ) -> Result<u64, ProgressError> {
        let message = message.into();
        let seq = self.store.increment(keys::LOG_SEQ, 1).await?;
        let entry = LogEntry {
            seq,
            message,
            severity,
            timestamp: Utc::now(),
        };
        self.store.set(&keys::log_entry(seq), &entry).await?;

        let adapter = self.store.scope().as_str();
        match severity {
            Severity::Info | Severity::Success => info!(adapter, seq, "{}", entry.message),
            Severity::Warning => warn!(adapter, seq, "{}", entry.message),
            Severity::Error => error!(adapter, seq, "{}", entry.message),
        }

        let retention = self.retention as u64;
        if seq > retention {
            self.store.remove(&keys::log_entry(seq - retention)).await?;
        }

        Ok(seq)
    }

    pub async fn info(&self, message: impl Into<String>) -> Result<u64, ProgressError> {
        self.log(message, Severity::Info).await
    }

    pub async fn success(&self, message: impl Into<String>) -> Result<u64, ProgressError> {
        self.log(message, Severity::Success).await
    }

    pub async fn warn(&self, message: impl Into<String>) -> Result<u64, ProgressError> {
        self.log(message, Severity::Warning).await
    }

    pub async fn error(&self, message: impl Into<String>) -> Result<u64, ProgressError> {
        self.log(message, Severity::Error).await
    }

    /// Entries with `seq > after`, at most one page. The returned cursor is
    /// never behind `after`.
    pub async fn get_logs(&self, after: u64) -> Result<LogPage, ProgressError> {
        let entries: Vec<LogEntry> = self
            .store
            .scan_after(keys::LOG_ENTRY_PREFIX, &keys::log_entry(after), self.page_size)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();

        let cursor = entries.last().map_or(after, |e| e.seq.max(after));
        Ok(LogPage { entries, cursor })
    }

    pub async fn last_seq(&self) -> Result<u64, ProgressError> {
        Ok(self.store.get_uncached(keys::LOG_SEQ, 0).await?)
    }

    pub async fn snapshot(&self) -> Result<ProgressSnapshot, ProgressError> {
        let totals = self.totals().await?;
        Ok(ProgressSnapshot {
            adapter_id: self.store.scope().to_string(),
            percent: totals.percent(),
            totals,
            last_log_seq: self.last_seq().await?,
        })
    }

    /// Clears counters and log entries. The log sequence keeps growing so
    /// cursors held by a UI stay valid.
    pub async fn reset(&self) -> Result<(), ProgressError> {
        self.store.remove_prefix(keys::PROGRESS_PREFIX).await?;
        self.store.remove_prefix(keys::LOG_ENTRY_PREFIX).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateStore, sled_store::SledStateStore};
    use model::core::identifiers::AdapterId;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn service(dir: &std::path::Path) -> ProgressService {
        let backend: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir).expect("open sled"));
        ProgressService::new(CheckpointStore::new(backend, AdapterId::new("dir")))
    }

    async fn record(progress: &ProgressService, counters: &StageCounters) {
        let mut commit = Commit::new();
        ProgressService::stage_counters(&mut commit, counters);
        progress.store.commit(commit).await.unwrap();
    }

    fn imported(n: u64) -> StageCounters {
        StageCounters {
            imported: n,
            ..StageCounters::default()
        }
    }

    #[tokio::test]
    async fn total_is_only_set_once() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path());

        assert_eq!(progress.set_total_once(124).await.unwrap(), 124);
        assert_eq!(progress.set_total_once(999).await.unwrap(), 124);
        assert_eq!(progress.totals().await.unwrap().total_expected, Some(124));
    }

    #[tokio::test]
    async fn staged_counters_fold_into_totals() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path());
        progress.set_total_once(10).await.unwrap();

        let counters = StageCounters {
            imported: 2,
            updated: 1,
            skipped: 1,
            failed: 1,
        };
        record(&progress, &counters).await;

        let totals = progress.totals().await.unwrap();
        assert_eq!((totals.succeeded, totals.failed, totals.skipped), (3, 1, 1));
        assert_eq!(progress.get_progress().await.unwrap(), 50);
    }

    #[test]
    fn empty_counters_stage_nothing() {
        let mut commit = Commit::new();
        ProgressService::stage_counters(&mut commit, &StageCounters::default());
        assert!(commit.is_empty());

        ProgressService::stage_counters(&mut commit, &imported(3));
        assert_eq!(commit.ops().len(), 1);
        assert_eq!(commit.ops()[0].key(), keys::PROGRESS_SUCCEEDED);
    }

    #[tokio::test]
    async fn concurrent_increases_are_not_lost() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let progress = progress.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    progress.increase(CounterKind::Succeeded, 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(progress.totals().await.unwrap().succeeded, 200);
    }

    #[tokio::test]
    async fn concurrent_staged_commits_are_not_lost() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let progress = progress.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    record(&progress, &imported(2)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(progress.totals().await.unwrap().succeeded, 200);
    }

    #[tokio::test]
    async fn logs_are_returned_by_cursor_delta() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path());

        progress.info("one").await.unwrap();
        progress.warn("two").await.unwrap();
        progress.error("three").await.unwrap();

        let page = progress.get_logs(0).await.unwrap();
        assert_eq!(page.entries.len(), 3);
        assert_eq!(page.cursor, 3);
        assert_eq!(page.entries[1].severity, Severity::Warning);

        let page = progress.get_logs(2).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].message, "three");

        let page = progress.get_logs(3).await.unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.cursor, 3);

        let page = progress.get_logs(50).await.unwrap();
        assert_eq!(page.cursor, 50);
    }

    #[tokio::test]
    async fn log_is_bounded_and_paged() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path()).with_limits(5, 2);

        for i in 0..8 {
            progress.info(format!("line {i}")).await.unwrap();
        }

        let first = progress.get_logs(0).await.unwrap();
        assert_eq!(first.entries.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);

        let second = progress.get_logs(first.cursor).await.unwrap();
        assert_eq!(second.entries.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![6, 7]);
    }

    #[tokio::test]
    async fn reset_keeps_sequence_growing() {
        let dir = tempdir().unwrap();
        let progress = service(dir.path());

        progress.increase(CounterKind::Failed, 4).await.unwrap();
        progress.set_total_once(9).await.unwrap();
        progress.info("before").await.unwrap();
        progress.reset().await.unwrap();

        assert_eq!(progress.totals().await.unwrap(), RunTotals::default());
        assert!(progress.get_logs(0).await.unwrap().entries.is_empty());

        let seq = progress.info("after").await.unwrap();
        assert_eq!(seq, 2);
        assert_eq!(progress.set_total_once(11).await.unwrap(), 11);
    }
}
