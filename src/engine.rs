//! Download engine contract.
//!
//! The engine performs the actual network and media work for a job. The
//! orchestrator hands it the job's opaque spec and consumes a stream of
//! [`EngineEvent`]s until the first terminal event (`Success` or `Failure`).
//! A stream that ends without a terminal event counts as a failure.
//!
//! Cancellation is cooperative: the engine receives a [`CancellationToken`]
//! and should stop as soon as it is triggered. The orchestrator stops reading
//! the stream shortly after cancelling regardless of whether the engine
//! acknowledges.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::{JobId, JobKind};

/// Everything the engine needs to run one attempt
#[derive(Clone, Debug)]
pub struct EngineJob {
    /// Job being executed
    pub id: JobId,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Target resource
    pub source_ref: String,
    /// Submission kind
    pub kind: JobKind,
    /// Engine options, exactly as submitted
    pub spec: serde_json::Value,
}

/// Event emitted by the engine while executing a job
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// Raw progress report
    Progress {
        /// Percentage (0.0 to 100.0)
        percent: f32,
        /// Transfer rate in bytes per second
        rate_bps: Option<u64>,
        /// Estimated time remaining
        eta: Option<Duration>,
    },
    /// The attempt succeeded
    Success(ResultMetadata),
    /// The attempt failed
    Failure(EngineFailure),
}

/// Engine-reported metadata of a successful retrieval
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Title of the retrieved item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Where the engine stored the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<std::path::PathBuf>,
    /// Bytes transferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Any further engine-specific fields
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// Raw failure reported by the engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFailure {
    /// Raw error text
    pub message: String,
    /// HTTP-equivalent status code, when the engine knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl EngineFailure {
    /// Failure with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Failure carrying an HTTP-equivalent status
    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl std::fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.message, status),
            None => f.write_str(&self.message),
        }
    }
}

/// External collaborator that performs the retrieval for one job attempt
pub trait DownloadEngine: Send + Sync {
    /// Short name for logs and capabilities
    fn name(&self) -> &str;

    /// Start executing `job`, returning its event stream
    ///
    /// Implementations must not block the caller; long work belongs inside
    /// the returned stream. `cancel` is triggered when the user cancels the job
    /// or the orchestrator shuts down.
    fn execute(&self, job: EngineJob, cancel: CancellationToken) -> BoxStream<'static, EngineEvent>;
}
