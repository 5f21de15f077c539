//! Progress throttling between the engine and event subscribers.
//!
//! Engines may report progress many times per second. Each running job gets a
//! [`ProgressReporter`] that forwards at most one update per
//! `progress.throttle_interval` and keeps the job's `percent` current. Terminal
//! events bypass the reporter and are emitted as soon as they happen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, broadcast};

use crate::types::{Event, JobId, ProgressUpdate};

use super::JobQueue;

/// Rate gate: lets one event through per interval
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Whether an event offered at `now` should be forwarded
    pub(crate) fn ready(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Per-job progress forwarder
pub(crate) struct ProgressReporter {
    job_id: JobId,
    throttle: ProgressThrottle,
    event_tx: broadcast::Sender<Event>,
    jobs: Arc<Mutex<JobQueue>>,
}

impl ProgressReporter {
    pub(crate) fn new(
        job_id: JobId,
        interval: Duration,
        event_tx: broadcast::Sender<Event>,
        jobs: Arc<Mutex<JobQueue>>,
    ) -> Self {
        Self {
            job_id,
            throttle: ProgressThrottle::new(interval),
            event_tx,
            jobs,
        }
    }

    /// Offer a raw engine progress report; dropped if throttled
    pub(crate) async fn report(&mut self, percent: f32, rate_bps: Option<u64>, eta: Option<Duration>) {
        if !self.throttle.ready(Instant::now()) {
            return;
        }

        let percent = percent.clamp(0.0, 100.0);
        if let Some(job) = self.jobs.lock().await.get_mut(self.job_id) {
            job.percent = percent;
        }

        // send() never waits; lagging subscribers lose the oldest events
        self.event_tx
            .send(Event::Progress(ProgressUpdate {
                job_id: self.job_id,
                percent,
                rate_bps,
                eta,
            }))
            .ok();
    }
}
