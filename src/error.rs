//! Error types shared by the fetch, output and daemon layers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`PollError`].
pub type Result<T> = std::result::Result<T, PollError>;

/// Errors that escape a batch or a daemon tick.
///
/// Per-fetch and per-body failures never show up here: they are logged and
/// dropped where they happen.
#[derive(Error, Debug)]
pub enum PollError {
    /// The advisory lock guarding a shared file was not acquired in time.
    #[error("Timed out after {timeout:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// A single-query request produced no successful response.
    #[error("Empty answer")]
    EmptyBatchResult,

    /// Invalid configuration (bad sweep arguments, zero timeout, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The HTTP connection pool could not be built.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Transport-level failure of a single request.
///
/// HTTP error statuses are not transport failures; they come back as a
/// normal response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),
}
