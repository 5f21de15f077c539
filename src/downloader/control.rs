//! Job lifecycle control: pause, resume, cancel, schedule.

use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;

use crate::error::{Error, JobError, Result};
use crate::scheduler::ScheduleOrigin;
use crate::types::{Event, GroupId, Job, JobId, JobKind, JobRequest, JobState};

use super::MediaDownloader;

fn invalid_state(job: &Job, operation: &str) -> Error {
    Error::Job(JobError::InvalidState {
        id: job.id,
        operation: operation.to_string(),
        current_state: job.state,
    })
}

impl MediaDownloader {
    /// Pause the whole queue
    ///
    /// Workers stop claiming new jobs. Jobs already downloading are not
    /// affected and run to completion.
    pub async fn pause(&self) {
        let changed = self.queue_state.jobs.lock().await.set_paused(true);
        if changed {
            tracing::info!("Queue paused");
            self.emit_event(Event::QueuePaused);
        }
    }

    /// Resume the whole queue after [`pause`](Self::pause)
    pub async fn resume(&self) {
        let changed = self.queue_state.jobs.lock().await.set_paused(false);
        if changed {
            tracing::info!("Queue resumed");
            self.emit_event(Event::QueueResumed);
            self.queue_state.job_available.notify_waiters();
        }
    }

    /// Whether the queue-wide pause flag is set
    pub async fn is_paused(&self) -> bool {
        self.queue_state.jobs.lock().await.is_paused()
    }

    /// Pause one job
    ///
    /// Only `Queued` and `Retrying` jobs can be paused; a downloading job is
    /// not pausable mid-flight. Pausing an already paused job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `JobError::NotFound` for unknown jobs and `JobError::InvalidState`
    /// for jobs in any other state.
    pub async fn pause_job(&self, id: JobId) -> Result<()> {
        let mut jobs = self.queue_state.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or(Error::Job(JobError::NotFound { id }))?;

        match job.state {
            JobState::Paused => return Ok(()),
            JobState::Queued | JobState::Retrying => {
                let previous = job.state;
                job.transition(JobState::Paused)?;
                job.resume_to = Some(previous);
            }
            _ => return Err(invalid_state(job, "pause")),
        }
        drop(jobs);

        tracing::info!(job_id = %id, "Job paused");
        self.emit_event(Event::Paused { id });
        Ok(())
    }

    /// Resume a paused job into the state it was paused from
    ///
    /// A job paused while `Queued` keeps its original position in the queue.
    /// A job paused while waiting out a retry backoff continues waiting, or is
    /// queued right away if the backoff elapsed in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidState` if the job is not paused.
    pub async fn resume_job(&self, id: JobId) -> Result<()> {
        let mut jobs = self.queue_state.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or(Error::Job(JobError::NotFound { id }))?;

        if job.state != JobState::Paused {
            return Err(invalid_state(job, "resume"));
        }
        let next = job.resume_to.take().unwrap_or(JobState::Queued);
        job.transition(next)?;
        if next == JobState::Queued {
            jobs.link(id);
        }
        drop(jobs);

        tracing::info!(job_id = %id, state = %next, "Job resumed");
        self.emit_event(Event::Resumed { id });
        if next == JobState::Queued {
            self.queue_state.job_available.notify_one();
        }
        Ok(())
    }

    /// Cancel one job
    ///
    /// Jobs that are waiting (scheduled, queued, paused, retrying) become
    /// `Cancelled` immediately. A downloading job is signalled to stop and
    /// becomes `Cancelled` once the engine acknowledges or the acknowledgement
    /// timeout expires. Cancelling an already cancelled job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidState` for jobs that completed, failed or
    /// were skipped.
    pub async fn cancel_job(&self, id: JobId) -> Result<()> {
        let mut jobs = self.queue_state.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or(Error::Job(JobError::NotFound { id }))?;

        match job.state {
            JobState::Cancelled => Ok(()),
            JobState::Downloading => {
                if let Some(token) = self.queue_state.active_jobs.lock().await.get(&id) {
                    token.cancel();
                }
                tracing::info!(job_id = %id, "Cancellation signalled to running job");
                Ok(())
            }
            state if state.is_terminal() => Err(invalid_state(job, "cancel")),
            _ => {
                job.transition(JobState::Cancelled)?;
                job.scheduled_at = None;
                job.resume_to = None;
                job.last_error = None;
                let snapshot = job.clone();
                jobs.unlink(id);
                self.queue_state.scheduler.lock().await.remove(id);
                drop(jobs);

                tracing::info!(job_id = %id, "Job cancelled");
                self.emit_event(Event::Cancelled { id });
                self.record_history(&snapshot).await;
                Ok(())
            }
        }
    }

    /// Cancel every waiting job, optionally only those of one group
    ///
    /// Scheduled, queued, paused and retrying jobs become `Cancelled`
    /// immediately. Downloading jobs are signalled to stop; their final state
    /// is set once the engine acknowledges. Returns the number of jobs
    /// cancelled immediately.
    pub async fn cancel_all(&self, group_id: Option<GroupId>) -> usize {
        let matches = |job: &Job| group_id.is_none() || job.group_id == group_id;

        let mut jobs = self.queue_state.jobs.lock().await;
        let mut cancelled = Vec::new();
        let mut signalled = Vec::new();

        for job in jobs.iter_mut().filter(|job| matches(&**job)) {
            match job.state {
                JobState::Downloading => signalled.push(job.id),
                state if state.is_terminal() => {}
                _ => {
                    if job.transition(JobState::Cancelled).is_ok() {
                        job.scheduled_at = None;
                        job.resume_to = None;
                        job.last_error = None;
                        cancelled.push(job.clone());
                    }
                }
            }
        }

        {
            let mut scheduler = self.queue_state.scheduler.lock().await;
            for job in &cancelled {
                jobs.unlink(job.id);
                scheduler.remove(job.id);
            }
        }
        {
            let active = self.queue_state.active_jobs.lock().await;
            for id in &signalled {
                if let Some(token) = active.get(id) {
                    token.cancel();
                }
            }
        }
        drop(jobs);

        tracing::info!(
            group_id = ?group_id,
            cancelled = cancelled.len(),
            signalled = signalled.len(),
            "Cancel all"
        );

        for job in &cancelled {
            self.emit_event(Event::Cancelled { id: job.id });
            self.record_history(job).await;
        }

        cancelled.len()
    }

    /// Submit a job to start at `at`
    ///
    /// The job is held by the scheduler in `Scheduled` state and goes through
    /// the dedup check when it comes due, ending up `Queued` or `Skipped`.
    /// Plain single-item requests are given the `Scheduled` kind.
    pub async fn schedule(&self, request: JobRequest, at: DateTime<Utc>) -> Result<Job> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let request = if request.kind == JobKind::Single {
            request.with_kind(JobKind::Scheduled)
        } else {
            request
        };

        let mut job = Job::from_request(request, None, JobState::Scheduled);
        job.scheduled_at = Some(at);
        let id = job.id;

        {
            let mut jobs = self.queue_state.jobs.lock().await;
            jobs.insert(job.clone());
            self.queue_state
                .scheduler
                .lock()
                .await
                .insert(id, at, ScheduleOrigin::User);
        }

        tracing::info!(job_id = %id, at = %at, source_ref = %job.source_ref, "Job scheduled");
        self.emit_event(Event::Scheduled { id, at });
        Ok(job)
    }

    /// Remove a scheduled job before it fires
    ///
    /// The job becomes `Cancelled` and never reaches `Queued`. Calling this
    /// again for the same job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `JobError::NotFound` for unknown jobs and
    /// `JobError::InvalidState` if the job already left the scheduler.
    pub async fn remove_scheduled(&self, id: JobId) -> Result<()> {
        let mut jobs = self.queue_state.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or(Error::Job(JobError::NotFound { id }))?;

        match job.state {
            JobState::Scheduled => {}
            JobState::Cancelled => return Ok(()),
            _ => return Err(invalid_state(job, "remove scheduled")),
        }

        job.transition(JobState::Cancelled)?;
        job.scheduled_at = None;
        let snapshot = job.clone();
        self.queue_state.scheduler.lock().await.remove(id);
        drop(jobs);

        tracing::info!(job_id = %id, "Scheduled job removed");
        self.emit_event(Event::Cancelled { id });
        self.record_history(&snapshot).await;
        Ok(())
    }
}
