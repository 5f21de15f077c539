//! Job task orchestration: top-level lifecycle for a single engine attempt.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{DownloadEngine, EngineEvent, EngineJob};
use crate::retry::{ClassifiedError, FailureKind, classify};
use crate::types::{Event, JobState};

use super::super::progress::ProgressReporter;
use super::context::{AttemptOutcome, JobTaskContext};
use super::finalization::{finalize_attempt, finalize_skipped};

const REASON_ENGINE_PANICKED: &str = "The download engine crashed.";
const REASON_NO_RESULT: &str = "The download ended without a result.";

/// Aborts the wrapped task when dropped, so an aborted worker slot never
/// leaves an engine stream running behind it
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Core job task -- runs one attempt of a claimed job to its outcome.
///
/// Phases:
/// 1. Recheck the archive (the item may have been retrieved since enqueue)
/// 2. Count the attempt and announce it
/// 3. Consume the engine's event stream until a terminal event or cancellation
/// 4. Apply the outcome: complete, retry, fail or cancel
pub(crate) async fn run_job_task(mut ctx: JobTaskContext) {
    let id = ctx.id;

    // Phase 1: claim-time dedup
    if ctx.downloader.is_archived(&ctx.job.archive_key).await {
        tracing::info!(job_id = %id, archive_key = %ctx.job.archive_key, "Archived since enqueue, skipping");
        finalize_skipped(ctx).await;
        return;
    }

    // Phase 2: count the attempt
    let attempt = {
        let mut jobs = ctx.downloader.queue_state.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(job) if job.state == JobState::Downloading => {
                job.attempt += 1;
                job.attempt
            }
            _ => {
                drop(jobs);
                tracing::warn!(job_id = %id, "Claimed job is no longer downloading");
                ctx.remove_from_active().await;
                return;
            }
        }
    };
    ctx.job.attempt = attempt;

    tracing::info!(job_id = %id, attempt, source_ref = %ctx.job.source_ref, "Starting attempt");
    ctx.downloader.emit_event(Event::Started { id, attempt });

    // Phase 3: run the engine
    let outcome = execute_attempt(&ctx).await;

    // Phase 4: apply the outcome
    finalize_attempt(ctx, outcome).await;
}

/// Run the engine in its own task so a panicking engine fails only this attempt
async fn execute_attempt(ctx: &JobTaskContext) -> AttemptOutcome {
    let downloader = &ctx.downloader;
    let reporter = ProgressReporter::new(
        ctx.id,
        downloader.config.progress.throttle_interval,
        downloader.event_tx.clone(),
        Arc::clone(&downloader.queue_state.jobs),
    );

    let mut task = AbortOnDrop(tokio::spawn(consume_engine(
        Arc::clone(&downloader.engine),
        ctx.engine_job(),
        ctx.cancel_token.clone(),
        reporter,
        downloader.config.queue.cancel_ack_timeout,
    )));

    match (&mut task.0).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(job_id = %ctx.id, error = %e, "Download engine task failed");
            AttemptOutcome::Failure(ClassifiedError::new(
                FailureKind::Unknown,
                REASON_ENGINE_PANICKED,
                e.to_string(),
            ))
        }
    }
}

async fn consume_engine(
    engine: Arc<dyn DownloadEngine>,
    job: EngineJob,
    cancel: CancellationToken,
    mut reporter: ProgressReporter,
    ack_timeout: Duration,
) -> AttemptOutcome {
    let id = job.id;
    let mut events = engine.execute(job, cancel.clone());

    loop {
        let event = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            event = events.next() => Some(event),
        };

        let Some(event) = event else {
            await_cancel_ack(id, &mut events, ack_timeout).await;
            return AttemptOutcome::Cancelled;
        };

        match event {
            Some(EngineEvent::Progress { percent, rate_bps, eta }) => {
                reporter.report(percent, rate_bps, eta).await;
            }
            // a result racing the cancel signal does not win
            Some(_) if cancel.is_cancelled() => return AttemptOutcome::Cancelled,
            Some(EngineEvent::Success(result)) => return AttemptOutcome::Success(result),
            Some(EngineEvent::Failure(failure)) => {
                return AttemptOutcome::Failure(classify(&failure));
            }
            None => {
                return AttemptOutcome::Failure(ClassifiedError::new(
                    FailureKind::Unknown,
                    REASON_NO_RESULT,
                    "engine stream ended without a terminal event",
                ));
            }
        }
    }
}

/// Give the engine a bounded window to acknowledge cancellation
async fn await_cancel_ack(
    id: crate::types::JobId,
    events: &mut BoxStream<'static, EngineEvent>,
    ack_timeout: Duration,
) {
    let drain = async {
        while let Some(event) = events.next().await {
            if !matches!(event, EngineEvent::Progress { .. }) {
                break;
            }
        }
    };

    if tokio::time::timeout(ack_timeout, drain).await.is_err() {
        tracing::warn!(
            job_id = %id,
            timeout = ?ack_timeout,
            "Engine did not acknowledge cancellation, releasing slot"
        );
    } else {
        tracing::debug!(job_id = %id, "Engine acknowledged cancellation");
    }
}
