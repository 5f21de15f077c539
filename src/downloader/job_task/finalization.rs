//! Attempt finalization: apply the outcome of an engine attempt to the job.

use chrono::Utc;

use crate::engine::ResultMetadata;
use crate::retry::{ClassifiedError, FailureKind};
use crate::scheduler::ScheduleOrigin;
use crate::types::{Event, Job, JobState};

use super::context::{AttemptOutcome, JobTaskContext};

/// Apply an attempt outcome, then release the worker's claim.
pub(super) async fn finalize_attempt(ctx: JobTaskContext, outcome: AttemptOutcome) {
    match outcome {
        AttemptOutcome::Success(result) => complete(&ctx, result).await,
        AttemptOutcome::Failure(error) => fail_or_retry(&ctx, error).await,
        AttemptOutcome::Cancelled => cancel(&ctx).await,
    }
    ctx.remove_from_active().await;
}

/// The item was archived between enqueue and claim; no engine call was made.
pub(super) async fn finalize_skipped(ctx: JobTaskContext) {
    if let Some(job) = settle(&ctx, JobState::Skipped, |_| {}).await {
        ctx.downloader.emit_event(Event::Skipped { id: ctx.id });
        ctx.downloader.record_history(&job).await;
    }
    ctx.remove_from_active().await;
}

/// Move the job out of `Downloading` under the queue lock.
///
/// Returns `None` if the job already left `Downloading` (forced to `Failed`
/// by shutdown while the attempt was still running). A `Retrying` job is
/// registered with the scheduler before the lock is released, so a cancel
/// can never observe it without its scheduler entry.
async fn settle(
    ctx: &JobTaskContext,
    next: JobState,
    update: impl FnOnce(&mut Job),
) -> Option<Job> {
    let queue_state = &ctx.downloader.queue_state;
    let mut jobs = queue_state.jobs.lock().await;
    let job = jobs.get_mut(ctx.id)?;

    if job.state != JobState::Downloading {
        tracing::debug!(job_id = %ctx.id, state = %job.state, "Attempt outcome discarded");
        return None;
    }
    if let Err(e) = job.transition(next) {
        tracing::error!(job_id = %ctx.id, error = %e, "Failed to apply attempt outcome");
        return None;
    }
    update(job);

    if next == JobState::Retrying
        && let Some(at) = job.scheduled_at
    {
        queue_state
            .scheduler
            .lock()
            .await
            .insert(ctx.id, at, ScheduleOrigin::Retry);
    }
    Some(job.clone())
}

async fn complete(ctx: &JobTaskContext, result: ResultMetadata) {
    let downloader = &ctx.downloader;

    // the archive entry is written under the queue lock: never for a job that
    // shutdown already failed, and before the job is visible as Completed
    let job = {
        let mut jobs = downloader.queue_state.jobs.lock().await;
        let Some(job) = jobs.get_mut(ctx.id) else {
            return;
        };
        if job.state != JobState::Downloading {
            tracing::debug!(job_id = %ctx.id, state = %job.state, "Attempt outcome discarded");
            return;
        }

        if downloader.config.archive.enabled
            && let Err(e) = downloader.archive.add(job.archive_key.clone()).await
        {
            tracing::error!(
                job_id = %ctx.id,
                archive_key = %job.archive_key,
                error = %e,
                "Failed to record completed job in archive"
            );
        }

        if let Err(e) = job.transition(JobState::Completed) {
            tracing::error!(job_id = %ctx.id, error = %e, "Failed to apply attempt outcome");
            return;
        }
        job.percent = 100.0;
        job.result = Some(result.clone());
        job.last_error = None;
        job.clone()
    };

    tracing::info!(job_id = %ctx.id, attempt = job.attempt, title = ?result.title, "Job completed");
    downloader.emit_event(Event::Completed {
        id: ctx.id,
        result,
    });
    downloader.record_history(&job).await;
}

async fn fail_or_retry(ctx: &JobTaskContext, error: ClassifiedError) {
    let decision = ctx
        .downloader
        .retry_policy
        .decide(&error.kind, ctx.job.attempt);
    if !decision.should_retry {
        fail(ctx, error).await;
        return;
    }

    let delay = ctx.downloader.retry_policy.jittered(decision.delay);
    let at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    let Some(job) = settle(ctx, JobState::Retrying, |job| {
        job.last_error = Some(error.clone());
        job.scheduled_at = Some(at);
    })
    .await
    else {
        return;
    };

    tracing::warn!(
        job_id = %ctx.id,
        attempt = job.attempt,
        max_retries = ctx.downloader.retry_policy.max_retries(),
        delay = ?delay,
        error = %error.raw,
        "Transient failure, retry scheduled"
    );
    ctx.downloader.emit_event(Event::Retrying {
        id: ctx.id,
        attempt: job.attempt,
        delay,
        reason: error.reason,
    });
}

async fn fail(ctx: &JobTaskContext, error: ClassifiedError) {
    let Some(job) = settle(ctx, JobState::Failed, |job| {
        job.last_error = Some(error.clone());
    })
    .await
    else {
        return;
    };

    if error.kind == FailureKind::Unknown {
        tracing::error!(job_id = %ctx.id, attempt = job.attempt, raw = %error.raw, "Job failed with unclassified error");
    } else {
        tracing::info!(
            job_id = %ctx.id,
            attempt = job.attempt,
            kind = %error.kind.code(),
            reason = %error.reason,
            "Job failed"
        );
    }

    ctx.downloader.emit_event(Event::Failed {
        id: ctx.id,
        kind: error.kind,
        reason: error.reason.clone(),
    });
    ctx.downloader.record_history(&job).await;

    if error.kind.halts_group()
        && let Some(group_id) = job.group_id
    {
        halt_group(ctx, group_id, &error).await;
    }
}

/// Fail every waiting member of the job's group
///
/// An environment failure (missing transcoder, locked cookie database) would
/// hit every remaining member the same way.
async fn halt_group(ctx: &JobTaskContext, group_id: crate::types::GroupId, cause: &ClassifiedError) {
    let halted_error = ClassifiedError::new(
        cause.kind,
        format!("Halted: {}", cause.reason),
        cause.raw.clone(),
    );

    let halted: Vec<Job> = {
        let queue_state = &ctx.downloader.queue_state;
        let mut jobs = queue_state.jobs.lock().await;
        let mut halted = Vec::new();

        for job in jobs.iter_mut().filter(|job| {
            job.group_id == Some(group_id)
                && matches!(
                    job.state,
                    JobState::Queued | JobState::Retrying | JobState::Paused
                )
        }) {
            if job.transition(JobState::Failed).is_ok() {
                job.scheduled_at = None;
                job.resume_to = None;
                job.last_error = Some(halted_error.clone());
                halted.push(job.clone());
            }
        }

        let mut scheduler = queue_state.scheduler.lock().await;
        for job in &halted {
            jobs.unlink(job.id);
            scheduler.remove(job.id);
        }
        halted
    };

    tracing::warn!(
        group_id = %group_id,
        halted = halted.len(),
        reason = %cause.reason,
        "Environment failure, halting remaining group members"
    );

    for job in &halted {
        ctx.downloader.emit_event(Event::Failed {
            id: job.id,
            kind: halted_error.kind,
            reason: halted_error.reason.clone(),
        });
        ctx.downloader.record_history(job).await;
    }
}

async fn cancel(ctx: &JobTaskContext) {
    let Some(job) = settle(ctx, JobState::Cancelled, |job| job.last_error = None).await else {
        return;
    };

    tracing::info!(job_id = %ctx.id, attempt = job.attempt, "Running job cancelled");
    ctx.downloader.emit_event(Event::Cancelled { id: ctx.id });
    ctx.downloader.record_history(&job).await;
}
