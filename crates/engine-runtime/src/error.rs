use engine_config::{error::ConfigError, settings::ValidationErrors};
use engine_core::error::{MappingError, ProgressError, StateStoreError};
use engine_processing::error::{BoxError, QueueError};
use thiserror::Error;

/// Errors surfaced by the control operations (`start`, `poll`, `abort`,
/// `drain_tick`). Apart from `Validation`, nothing was persisted for the
/// failing call and it can be retried.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Id mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Stage '{stage}' failed: {source}")]
    Handler {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("Stage '{stage}' moved its offset backwards ({from} -> {to})")]
    OffsetRegression { stage: String, from: u64, to: u64 },

    #[error("Stage '{0}' is not part of the adapter's plan")]
    UnknownStage(String),

    #[error("Invalid stage plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Adapter '{0}' is already registered")]
    DuplicateAdapter(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure reported by a stage handler or a batch job.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The whole stage cannot run (for example its source table is missing).
    /// Logged; the pipeline moves on to the next stage.
    #[error("{message}")]
    Stage { message: String },

    /// Infrastructure failure. Nothing is persisted and the same call is
    /// retried on the next poll or tick.
    #[error(transparent)]
    System(BoxError),
}

impl HandlerError {
    pub fn stage(message: impl Into<String>) -> Self {
        Self::Stage {
            message: message.into(),
        }
    }

    pub fn system(error: impl Into<BoxError>) -> Self {
        Self::System(error.into())
    }
}

impl From<StateStoreError> for HandlerError {
    fn from(e: StateStoreError) -> Self {
        Self::system(e)
    }
}

impl From<ProgressError> for HandlerError {
    fn from(e: ProgressError) -> Self {
        Self::system(e)
    }
}

impl From<MappingError> for HandlerError {
    fn from(e: MappingError) -> Self {
        Self::system(e)
    }
}

impl From<QueueError> for HandlerError {
    fn from(e: QueueError) -> Self {
        Self::system(e)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("an adapter must declare at least one stage")]
    Empty,

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),
}

/// Common error type for all actors in the engine.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Actor internal error: {0}")]
    Internal(String),
}
