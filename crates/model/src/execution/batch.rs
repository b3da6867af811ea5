use crate::execution::task::StageCounters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::{Debug, Display};

/// Bound for the adapter-declared enum naming what a batch job does.
pub trait JobAction:
    Copy + Eq + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> JobAction for T where
    T: Copy + Eq + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bound for a deferred work item carried by a batch job.
pub trait JobItem: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> JobItem for T where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A bounded unit of deferred per-item work. Consumed exactly once, in
/// submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob<A, T> {
    pub seq: u64,
    pub action: A,
    pub items: Vec<T>,
    pub enqueued_at: DateTime<Utc>,
}

impl<A, T> BatchJob<A, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Returned by a job handler after one pass over a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Remove the job from the queue.
    Done,
    /// Leave the job at the head of the queue and run it again next tick.
    Reschedule,
}

/// Result of running one batch job, as seen by the queue's caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub status: JobStatus,
    pub counters: StageCounters,
}
