use engine_core::error::StateStoreError;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue state unavailable: {0}")]
    State(#[from] StateStoreError),

    #[error("Batch size {size} is outside the allowed range {min}..={max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    #[error("Job {seq} ({action}) failed: {source}")]
    Handler {
        seq: u64,
        action: String,
        #[source]
        source: BoxError,
    },
}
