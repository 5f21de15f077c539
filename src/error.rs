//! Error types for media-dl
//!
//! This module covers errors returned by the orchestrator's own API (bad
//! configuration, unknown jobs, illegal state transitions, storage failures).
//! Failures reported by the download engine for an individual job are not
//! errors of this kind: they are classified into a [`FailureKind`] by the
//! retry layer and travel on the job itself.
//!
//! [`FailureKind`]: crate::retry::FailureKind

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{JobId, JobState};

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "queue.max_concurrent_jobs")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job-related error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Archive store error
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Job-related errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found in the queue or the scheduler
    #[error("job {id} not found")]
    NotFound {
        /// The job ID that was not found
        id: JobId,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job ID that is in an invalid state for the operation
        id: JobId,
        /// The operation that was attempted (e.g., "pause", "resume")
        operation: String,
        /// The current state that prevents the operation
        current_state: JobState,
    },
}

/// Archive store errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A line in an archive file is not a `provider external_id` pair
    #[error("malformed archive line {line} in {path}: {content:?}")]
    MalformedLine {
        /// File that contained the line
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Offending line content
        content: String,
    },

    /// Provider or external id contains whitespace or is empty
    #[error("invalid archive entry {provider:?} {external_id:?}")]
    InvalidEntry {
        /// Provider component
        provider: String,
        /// External id component
        external_id: String,
    },
}
