//! Shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::retry::ClassifiedError;
use crate::types::{Event, Job, JobState};

use super::MediaDownloader;

/// How often shutdown re-checks whether running jobs have released their slots
const ACTIVE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

impl MediaDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new jobs (`enqueue` and `schedule` return `ShuttingDown`)
    /// 2. Signals cancellation to every running job and stops the scheduler
    /// 3. Waits up to `queue.shutdown_grace_period` for running jobs to release their slots
    /// 4. Records jobs still downloading after the grace period as `Failed` (forced shutdown)
    /// 5. Stops the worker tasks and emits [`Event::Shutdown`]
    ///
    /// Jobs still waiting (scheduled, queued, paused, retrying) are left as they
    /// are. Calling `shutdown` twice is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new jobs
        let was_accepting = self.queue_state.accepting_new.swap(false, Ordering::SeqCst);
        if !was_accepting {
            tracing::debug!("Shutdown already in progress");
        }

        // 2. Cancel every job token (children of the shutdown token) and wake idle slots
        let active_count = self.queue_state.active_jobs.lock().await.len();
        self.queue_state.shutdown_token.cancel();
        self.queue_state.job_available.notify_waiters();
        tracing::info!(active_count, "Signaled cancellation to running jobs");

        // 3. Wait for running jobs with the grace period
        let grace = self.config.queue.shutdown_grace_period;
        match tokio::time::timeout(grace, self.wait_for_active_jobs()).await {
            Ok(()) => tracing::info!("All running jobs released their slots"),
            Err(_) => {
                tracing::warn!(grace = ?grace, "Grace period expired, forcing remaining jobs to fail");
            }
        }

        // 4. Anything still downloading is recorded as failed
        let forced = self.fail_remaining_downloads().await;
        if forced > 0 {
            tracing::warn!(forced, "Jobs failed by forced shutdown");
        }

        // 5. Stop background tasks
        let handles: Vec<_> = self.queue_state.tasks.lock().await.drain(..).collect();
        for handle in handles {
            handle.abort();
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until no job holds a worker slot
    async fn wait_for_active_jobs(&self) {
        loop {
            let active_count = self.queue_state.active_jobs.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for running jobs to complete");
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
        }
    }

    /// Fail every job still `Downloading` and release its slot
    async fn fail_remaining_downloads(&self) -> usize {
        let error = ClassifiedError::forced_shutdown();

        let forced: Vec<Job> = {
            let mut jobs = self.queue_state.jobs.lock().await;
            let mut forced = Vec::new();
            for job in jobs
                .iter_mut()
                .filter(|job| job.state == JobState::Downloading)
            {
                if job.transition(JobState::Failed).is_ok() {
                    job.last_error = Some(error.clone());
                    forced.push(job.clone());
                }
            }

            let mut active = self.queue_state.active_jobs.lock().await;
            for job in &forced {
                active.remove(&job.id);
            }
            forced
        };

        for job in &forced {
            tracing::warn!(job_id = %job.id, attempt = job.attempt, "Job abandoned at shutdown");
            self.emit_event(Event::Failed {
                id: job.id,
                kind: error.kind,
                reason: error.reason.clone(),
            });
            self.record_history(job).await;
        }

        forced.len()
    }
}
