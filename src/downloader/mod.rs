//! Core orchestrator implementation split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Job collection, enqueue, claim, aggregates
//! - [`control`] - Pause/resume/cancel and scheduling operations
//! - [`queue_processor`] - Worker slots that claim and run jobs
//! - [`job_task`] - One engine attempt and its outcome
//! - [`progress`] - Progress throttling
//! - [`services`] - Background service starters
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod job_task;
mod lifecycle;
mod progress;
mod queue;
mod queue_processor;
mod services;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub(crate) use queue::JobQueue;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::db::{Database, HistoryQuery, HistoryStore};
use crate::engine::DownloadEngine;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::types::{Capabilities, Event, HistoryRecord, Job, JobId};

/// Queue and job state management
///
/// Lock order is `jobs`, then `scheduler` or `active_jobs`. No lock is held
/// across an engine call or an idle wait.
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Every job held in memory, plus the FIFO order of ready jobs
    pub(crate) jobs: Arc<Mutex<JobQueue>>,
    /// Future-dated jobs (user schedules and retry backoffs)
    pub(crate) scheduler: Arc<Mutex<Scheduler>>,
    /// Cancellation tokens of jobs currently owned by a worker
    pub(crate) active_jobs: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    /// Wakes idle worker slots when a job becomes claimable
    pub(crate) job_available: Arc<Notify>,
    /// Flag to indicate whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every job token; cancelled once at shutdown
    pub(crate) shutdown_token: CancellationToken,
    /// Set once `start` has spawned the background services
    pub(crate) started: Arc<AtomicBool>,
    /// Worker slot and scheduler task handles
    pub(crate) tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(JobQueue::new())),
            scheduler: Arc::new(Mutex::new(Scheduler::new())),
            active_jobs: Arc::new(Mutex::new(HashMap::new())),
            job_available: Arc::new(Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
            started: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Engine that performs the actual retrieval
    pub(crate) engine: Arc<dyn DownloadEngine>,
    /// Dedup store of already retrieved items
    pub(crate) archive: Arc<ArchiveStore>,
    /// Record of terminal jobs
    pub(crate) history: Arc<dyn HistoryStore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Backoff policy for transient failures
    pub(crate) retry_policy: Arc<RetryPolicy>,
    /// Queue and job state management
    pub(crate) queue_state: QueueState,
    /// Tools discovered at startup
    pub(crate) capabilities: Arc<Capabilities>,
}

impl MediaDownloader {
    /// Create a new MediaDownloader instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Opens/creates the SQLite history database and runs migrations
    /// - Opens/creates the archive file
    /// - Looks for an ffmpeg binary
    ///
    /// Workers do not run until [`start`](Self::start) is called.
    pub async fn new(config: Config, engine: Arc<dyn DownloadEngine>) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let archive = ArchiveStore::open(&config.archive.path).await?;

        Self::with_stores(config, engine, Arc::new(archive), Arc::new(db))
    }

    /// Create an instance around caller-provided archive and history stores
    pub fn with_stores(
        config: Config,
        engine: Arc<dyn DownloadEngine>,
        archive: Arc<ArchiveStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.progress.channel_capacity);

        let capabilities = Capabilities {
            transcoder: crate::tools::find_transcoder(&config.tools),
            engine: engine.name().to_string(),
        };
        tracing::info!(
            engine = %capabilities.engine,
            transcoder = ?capabilities.transcoder,
            max_concurrent_jobs = config.queue.max_concurrent_jobs,
            archive_enabled = config.archive.enabled,
            "Media downloader initialized"
        );

        Ok(Self {
            retry_policy: Arc::new(RetryPolicy::new(&config.retry)),
            config: Arc::new(config),
            engine,
            archive,
            history,
            event_tx,
            queue_state: QueueState::new(),
            capabilities: Arc::new(capabilities),
        })
    }

    /// Subscribe to job events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than
    /// `progress.channel_capacity` events, it will receive a `RecvError::Lagged` error.
    /// Senders never wait for slow subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Job events as a stream, skipping over any lag
    pub fn event_stream(&self) -> BoxStream<'static, Event> {
        tokio_stream::wrappers::BroadcastStream::new(self.event_tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::debug!(error = %e, "Event subscriber lagged");
                        None
                    }
                }
            })
            .boxed()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Query optional tools discovered at startup
    pub fn capabilities(&self) -> Capabilities {
        (*self.capabilities).clone()
    }

    /// The dedup store, for import/export/clear
    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Query persisted records of terminal jobs, most recent first
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        self.history.query(query).await
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped (ok() converts Err to None).
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Hand a terminal job to the history store
    ///
    /// Failures are logged; a history outage never changes a job's outcome.
    pub(crate) async fn record_history(&self, job: &Job) {
        let record = HistoryRecord::from_job(job);
        if let Err(e) = self.history.record(&record).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job history");
            return;
        }

        if let Some(limit) = self.config.persistence.history_limit
            && let Err(e) = self.history.prune(limit).await
        {
            tracing::warn!(error = %e, limit, "Failed to prune job history");
        }
    }
}
