//! State shared by the helpers of one engine attempt.

use tokio_util::sync::CancellationToken;

use crate::engine::{EngineJob, ResultMetadata};
use crate::retry::ClassifiedError;
use crate::types::{Job, JobId};

use super::super::MediaDownloader;

/// How one engine attempt ended
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// Engine reported success
    Success(ResultMetadata),
    /// Engine failed, or the attempt could not be completed
    Failure(ClassifiedError),
    /// The job's cancellation token fired before a result was accepted
    Cancelled,
}

/// Shared context for a single job attempt
pub(crate) struct JobTaskContext {
    pub(crate) id: JobId,
    /// Snapshot taken when the job was claimed
    pub(crate) job: Job,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) downloader: MediaDownloader,
}

impl JobTaskContext {
    pub(crate) fn new(job: Job, cancel_token: CancellationToken, downloader: MediaDownloader) -> Self {
        Self {
            id: job.id,
            job,
            cancel_token,
            downloader,
        }
    }

    /// What the engine is handed for this attempt
    pub(crate) fn engine_job(&self) -> EngineJob {
        EngineJob {
            id: self.id,
            attempt: self.job.attempt,
            source_ref: self.job.source_ref.clone(),
            kind: self.job.kind,
            spec: self.job.spec.clone(),
        }
    }

    /// Release the worker's claim on this job
    pub(crate) async fn remove_from_active(&self) {
        self.downloader
            .queue_state
            .active_jobs
            .lock()
            .await
            .remove(&self.id);
    }
}
