use engine_config::error::ConfigError;
use engine_core::error::{MappingError, ProgressError, StateStoreError};
use engine_runtime::error::MigrationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open state store at {path}: {source}")]
    OpenStore {
        path: String,
        #[source]
        source: StateStoreError,
    },

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Failed to read progress: {0}")]
    Progress(#[from] ProgressError),

    #[error("Failed to read id mappings: {0}")]
    Mapping(#[from] MappingError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("No stored state for adapter '{0}'")]
    UnknownAdapter(String),
}
