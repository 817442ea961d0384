//! Error types shared across the scheduler.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the scheduler's fallible operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No schedule is registered under the given reference.
    #[error("unknown schedule reference: {0}")]
    UnknownSchedule(String),

    /// No schedule controller is registered under the given reference.
    #[error("unknown controller reference: {0}")]
    UnknownController(String),

    /// Reading or writing a persisted document failed.
    #[error("storage i/o error at {path}: {source}")]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A persisted document could not be encoded or decoded.
    #[error("malformed document {key}: {source}")]
    Document {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The storage URI does not name a supported backend.
    #[error("unsupported storage uri: {0}")]
    StorageUri(String),

    /// A schedule loop thread could not be started.
    #[error("cannot start loop for {reference}: {source}")]
    Spawn {
        reference: String,
        #[source]
        source: io::Error,
    },

    /// A storage parameter is not of the form `key=value` or is unknown.
    #[error("invalid storage parameter: {0}")]
    StorageParam(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
