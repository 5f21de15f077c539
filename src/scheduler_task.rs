//! Background task that drives the [`Scheduler`](crate::scheduler::Scheduler)
//!
//! On every tick the task promotes each due entry: user-scheduled jobs pass
//! the dedup check and become `Queued` or `Skipped`, and jobs whose retry
//! backoff elapsed go back to the tail of the ready queue.
//!
//! # Features
//!
//! - Resolution set by `scheduler.tick_interval`
//! - Missed ticks are not replayed; one tick promotes everything overdue
//! - Graceful shutdown handling
//!
//! The task is spawned by [`MediaDownloader::start`]; it is public so callers
//! that manage their own tasks can run it directly.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::{MediaDownloader, config::Config};
//! use media_dl::scheduler_task::SchedulerTask;
//! # use media_dl::engine::DownloadEngine;
//! # use std::sync::Arc;
//!
//! # async fn example(engine: Arc<dyn DownloadEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = MediaDownloader::new(Config::default(), engine).await?;
//! let task = SchedulerTask::new(downloader.clone());
//!
//! // Run scheduler task (returns on shutdown)
//! tokio::spawn(async move {
//!     task.run().await;
//! });
//! # Ok(())
//! # }
//! ```

use crate::MediaDownloader;
use chrono::Utc;
use std::sync::atomic::Ordering;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Periodically promotes due scheduler entries into the ready queue
pub struct SchedulerTask {
    /// Downloader whose scheduler is driven and whose shutdown is observed
    downloader: MediaDownloader,
}

impl SchedulerTask {
    /// Creates a new scheduler task
    pub fn new(downloader: MediaDownloader) -> Self {
        Self { downloader }
    }

    /// Runs the tick loop until shutdown
    ///
    /// Each tick:
    /// 1. Checks whether shutdown was requested
    /// 2. Pops every entry due at the current time
    /// 3. Promotes them in due-time order
    pub async fn run(self) {
        let queue_state = &self.downloader.queue_state;
        let mut ticker = tokio::time::interval(self.downloader.config.scheduler.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Scheduler task started");

        loop {
            tokio::select! {
                _ = queue_state.shutdown_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !queue_state.accepting_new.load(Ordering::SeqCst) {
                break;
            }

            let promoted = self.downloader.promote_due(Utc::now()).await;
            if promoted > 0 {
                debug!(promoted, "Promoted due jobs");
            }
        }

        info!("Scheduler task shutting down");
    }
}
