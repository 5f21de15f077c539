//! Background service starters: worker pool and scheduler task.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::scheduler_task::SchedulerTask;

use super::MediaDownloader;

impl MediaDownloader {
    /// Start the worker pool and the scheduler task
    ///
    /// Jobs can be enqueued before `start`; they wait in `Queued` state until
    /// workers run. Calling `start` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if shutdown has already begun.
    pub async fn start(&self) -> Result<()> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if self.queue_state.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Background services already started");
            return Ok(());
        }

        let mut handles = self.start_workers();
        handles.push(self.start_scheduler());

        let slots = self.config.queue.max_concurrent_jobs;
        self.queue_state.tasks.lock().await.extend(handles);

        tracing::info!(slots, "Worker pool and scheduler started");
        Ok(())
    }

    /// Start the scheduler task that promotes due jobs every tick
    pub(crate) fn start_scheduler(&self) -> tokio::task::JoinHandle<()> {
        let scheduler_task = SchedulerTask::new(self.clone());

        let handle = tokio::spawn(async move {
            scheduler_task.run().await;
        });

        tracing::info!(
            tick_interval = ?self.config.scheduler.tick_interval,
            "Scheduler task started"
        );

        handle
    }
}
