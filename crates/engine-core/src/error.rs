use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("Failed to encode or decode state key '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Counter at state key '{key}' is not an unsigned integer")]
    CorruptCounter { key: String },
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("State store operation failed: {0}")]
    State(#[from] StateStoreError),

    #[error(
        "Namespace '{namespace}' uses external-field mapping but no destination index is configured"
    )]
    MissingIndex { namespace: String },

    #[error("External id lookup in '{namespace}' failed for source id '{source_id}': {message}")]
    Lookup {
        namespace: String,
        source_id: String,
        message: String,
    },
}

/// A single source row could not be migrated. Counted as failed; never stops
/// the surrounding stage or batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("Source row '{source_id}' is invalid: {reason}")]
    Invalid { source_id: String, reason: String },

    #[error("Destination rejected row '{source_id}': {message}")]
    Write { source_id: String, message: String },
}

#[derive(Error, Debug)]
pub enum UpsertError {
    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Progress state unavailable: {0}")]
    State(#[from] StateStoreError),
}
