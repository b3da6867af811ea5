use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors raised while assembling the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read env file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid env file: {message} at line {line}")]
    Parse { line: usize, message: String },

    #[error("{key}='{value}' is not a valid {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("{key}={value} is outside the allowed range {min}..={max}")]
    OutOfRange {
        key: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Cannot determine a home directory; set LISTMIG_STATE_DIR")]
    NoHomeDir,
}
