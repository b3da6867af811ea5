use crate::core::identifiers::AdapterId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

/// Bound satisfied by every adapter-declared stage enum.
pub trait Stage:
    Copy + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Stage for T where
    T: Copy + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// What happened to a single source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No mapping existed, a destination record was created.
    Imported,
    /// A mapping existed, the destination record was updated in place.
    Updated,
    Skipped,
    Failed,
}

/// Counters for a single stage invocation or a single batch job.
///
/// Zeroed before every dispatch; folded into [`RunTotals`] afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounters {
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl StageCounters {
    pub fn record(&mut self, outcome: Outcome) {
        self.add(outcome, 1);
    }

    pub fn add(&mut self, outcome: Outcome, n: u64) {
        let slot = match outcome {
            Outcome::Imported => &mut self.imported,
            Outcome::Updated => &mut self.updated,
            Outcome::Skipped => &mut self.skipped,
            Outcome::Failed => &mut self.failed,
        };
        *slot = slot.saturating_add(n);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn succeeded(&self) -> u64 {
        self.imported.saturating_add(self.updated)
    }

    pub fn processed(&self) -> u64 {
        self.succeeded()
            .saturating_add(self.skipped)
            .saturating_add(self.failed)
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0
    }
}

/// Which cumulative counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Succeeded,
    Failed,
    Skipped,
}

/// Cumulative counters of a whole run. Non-decreasing until the next reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Computed once by the counting pass, never recomputed mid-run.
    pub total_expected: Option<u64>,
}

impl RunTotals {
    pub fn processed(&self) -> u64 {
        self.succeeded
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }

    /// `round(100 * processed / max(1, total_expected))`, clamped to 100.
    pub fn percent(&self) -> u8 {
        let total = u128::from(self.total_expected.unwrap_or(0).max(1));
        let done = u128::from(self.processed());
        let rounded = (done * 200 + total) / (total * 2);
        rounded.min(100) as u8
    }
}

/// Adapter-agnostic extras carried along with the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExtra {
    pub total_items: Option<u64>,
    pub dry_run: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub stage_started_at: Option<DateTime<Utc>>,
}

/// Persisted state of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTask<S> {
    pub adapter_id: AdapterId,
    pub stage: S,
    /// Position inside the current stage. Only ever moves forward, except on
    /// a stage transition that asks for a reset.
    pub offset: u64,
    pub call: StageCounters,
    pub extra: TaskExtra,
}

impl<S: Stage> MigrationTask<S> {
    pub fn new(adapter_id: AdapterId, first_stage: S) -> Self {
        let now = Utc::now();
        Self {
            adapter_id,
            stage: first_stage,
            offset: 0,
            call: StageCounters::default(),
            extra: TaskExtra {
                started_at: Some(now),
                stage_started_at: Some(now),
                ..TaskExtra::default()
            },
        }
    }

    pub fn advance_offset(&mut self, by: u64) {
        self.offset = self.offset.saturating_add(by);
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.call.record(outcome);
    }

    /// Moves to `stage`; used by the sequencer on a transition.
    pub fn enter_stage(&mut self, stage: S, reset_offset: bool) {
        self.stage = stage;
        if reset_offset {
            self.offset = 0;
        }
        self.call.reset();
        self.extra.stage_started_at = Some(Utc::now());
    }
}
