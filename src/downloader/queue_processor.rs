//! Queue processor: fixed pool of worker slots that claim and run jobs.

use std::sync::atomic::Ordering;

use super::MediaDownloader;
use super::job_task::{JobTaskContext, run_job_task};

impl MediaDownloader {
    /// Spawn the worker pool
    ///
    /// Each of the `queue.max_concurrent_jobs` slots runs a loop that:
    /// 1. Claims the next `Queued` job (FIFO), skipping the claim while the queue is paused
    /// 2. Runs one engine attempt for it to completion
    /// 3. Otherwise waits for a new job, the idle poll interval, or shutdown
    ///
    /// A slot holds at most one job at a time, so the number of `Downloading`
    /// jobs never exceeds the configured concurrency.
    pub(crate) fn start_workers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.queue.max_concurrent_jobs)
            .map(|slot| {
                let downloader = self.clone();
                tokio::spawn(async move { downloader.run_worker_slot(slot).await })
            })
            .collect()
    }

    async fn run_worker_slot(&self, slot: usize) {
        let queue_state = &self.queue_state;
        let idle_poll = self.config.queue.idle_poll_interval;
        tracing::debug!(slot, "Worker slot started");

        loop {
            if queue_state.shutdown_token.is_cancelled()
                || !queue_state.accepting_new.load(Ordering::SeqCst)
            {
                break;
            }

            if let Some((job, token)) = self.claim_next().await {
                tracing::debug!(slot, job_id = %job.id, "Worker claimed job");
                run_job_task(JobTaskContext::new(job, token, self.clone())).await;
                continue;
            }

            // nothing claimable; bounded wait so paused or idle slots still re-check
            tokio::select! {
                _ = queue_state.shutdown_token.cancelled() => break,
                _ = queue_state.job_available.notified() => {}
                _ = tokio::time::sleep(idle_poll) => {}
            }
        }

        tracing::debug!(slot, "Worker slot stopped");
    }
}
