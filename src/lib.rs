//! # media-dl
//!
//! Job orchestration core for media retrieval applications.
//!
//! ## Overview
//!
//! Retrieval itself is delegated to a [`DownloadEngine`] implementation; the
//! crate never touches the network or media codecs. Consumers drive it through
//! [`MediaDownloader`] and observe it through [`Event`]s.
//!
//! The crate owns the job lifecycle: a FIFO queue served by a fixed pool of
//! worker slots, retry with exponential backoff for transient failures, a
//! scheduler for future-dated jobs, an append-only archive that prevents
//! retrieving the same item twice, and a history of finished jobs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::stream::{self, BoxStream, StreamExt};
//! use media_dl::{Config, DownloadEngine, EngineEvent, EngineJob, JobRequest, MediaDownloader};
//! use media_dl::engine::ResultMetadata;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct MyEngine;
//!
//! impl DownloadEngine for MyEngine {
//!     fn name(&self) -> &str {
//!         "my-engine"
//!     }
//!
//!     fn execute(&self, job: EngineJob, _cancel: CancellationToken) -> BoxStream<'static, EngineEvent> {
//!         let result = ResultMetadata {
//!             title: Some(job.source_ref),
//!             ..Default::default()
//!         };
//!         stream::iter(vec![EngineEvent::Success(result)]).boxed()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = MediaDownloader::new(Config::default(), Arc::new(MyEngine)).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader.start().await?;
//!     downloader
//!         .enqueue(JobRequest::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ", serde_json::json!({})))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download archive (dedup store)
pub mod archive;
/// Configuration types
pub mod config;
/// History persistence layer
pub mod db;
/// Core orchestrator implementation (decomposed into focused submodules)
pub mod downloader;
/// Download engine contract
pub mod engine;
/// Error types
pub mod error;
/// Failure classification and retry policy
pub mod retry;
/// Time-ordered scheduling of future jobs
pub mod scheduler;
/// Scheduler task execution
pub mod scheduler_task;
/// Optional external tool discovery
pub mod tools;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveEntry, ArchiveStore};
pub use config::Config;
pub use db::{Database, HistoryQuery, HistoryStore};
pub use downloader::MediaDownloader;
pub use engine::{DownloadEngine, EngineEvent, EngineFailure, EngineJob, ResultMetadata};
pub use error::{ArchiveError, DatabaseError, Error, JobError, Result};
pub use retry::{ClassifiedError, FailureKind, IsRetryable, PermissionReason, RetryPolicy};
pub use types::{
    Capabilities, Event, GroupId, GroupProgress, HistoryRecord, Job, JobId, JobKind, JobRequest,
    JobState, ProgressUpdate, QueueStats,
};

/// Block until SIGINT/SIGTERM (Ctrl+C elsewhere), then shut the downloader down.
///
/// In-flight jobs get the configured grace period before they are recorded as
/// failed; see [`MediaDownloader::shutdown`].
///
/// # Example
///
/// ```no_run
/// use media_dl::{MediaDownloader, Config, run_with_shutdown};
/// # use media_dl::DownloadEngine;
/// # use std::sync::Arc;
///
/// # async fn example(engine: Arc<dyn DownloadEngine>) -> Result<(), Box<dyn std::error::Error>> {
/// let downloader = MediaDownloader::new(Config::default(), engine).await?;
/// downloader.start().await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(downloader).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in sandboxes; fall back to whichever source works
    let terminate = signal(SignalKind::terminate())
        .inspect_err(|e| tracing::warn!(error = %e, "SIGTERM handler unavailable"))
        .ok();
    let interrupt = signal(SignalKind::interrupt())
        .inspect_err(|e| tracing::warn!(error = %e, "SIGINT handler unavailable"))
        .ok();

    let name = match (terminate, interrupt) {
        (Some(mut term), Some(mut int)) => tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        },
        (Some(mut term), None) => {
            term.recv().await;
            "SIGTERM"
        }
        (None, Some(mut int)) => {
            int.recv().await;
            "SIGINT"
        }
        (None, None) => {
            tracing::error!("No signal handlers could be registered, falling back to ctrl_c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "ctrl_c listener failed");
            }
            "ctrl_c"
        }
    };
    tracing::info!(signal = name, "Shutdown signal received");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!(signal = "ctrl_c", "Shutdown signal received");
}
