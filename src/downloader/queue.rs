//! Job collection management: enqueue, claim, promotion and aggregates.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveEntry;
use crate::error::{Error, JobError, Result};
use crate::scheduler::ScheduleOrigin;
use crate::types::{
    Event, GroupId, GroupProgress, Job, JobId, JobKind, JobRequest, JobState, QueueStats,
};

use super::MediaDownloader;

/// Every in-memory job plus the FIFO order of the ready ones
///
/// A job is linked into the ready order while it is `Queued`, or `Paused`
/// with `Queued` as its resume state, so a resumed job keeps its place.
/// All methods are synchronous; callers hold the queue mutex around them.
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    jobs: HashMap<JobId, Job>,
    ready: BTreeMap<u64, JobId>,
    position: HashMap<JobId, u64>,
    next_seq: u64,
    paused: bool,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a job; `Queued` jobs are appended to the tail of the ready order
    pub(crate) fn insert(&mut self, job: Job) {
        let id = job.id;
        let ready = job.state == JobState::Queued;
        self.jobs.insert(id, job);
        if ready {
            self.link(id);
        }
    }

    pub(crate) fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    /// Append `id` to the tail of the ready order unless it is already linked
    pub(crate) fn link(&mut self, id: JobId) {
        if self.position.contains_key(&id) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.insert(seq, id);
        self.position.insert(id, seq);
    }

    pub(crate) fn unlink(&mut self, id: JobId) {
        if let Some(seq) = self.position.remove(&id) {
            self.ready.remove(&seq);
        }
    }

    /// Take the oldest `Queued` job and move it to `Downloading`
    ///
    /// Returns nothing while the queue is paused. Because the caller holds the
    /// queue mutex, no two callers can claim the same job.
    pub(crate) fn claim_next(&mut self) -> Option<Job> {
        if self.paused {
            return None;
        }

        let (seq, id) = self
            .ready
            .iter()
            .find(|(_, id)| {
                self.jobs
                    .get(id)
                    .is_some_and(|job| job.state == JobState::Queued)
            })
            .map(|(seq, id)| (*seq, *id))?;

        self.ready.remove(&seq);
        self.position.remove(&id);

        let job = self.jobs.get_mut(&id)?;
        if let Err(e) = job.transition(JobState::Downloading) {
            tracing::error!(job_id = %id, error = %e, "Claimed job in unexpected state");
            return None;
        }
        job.percent = 0.0;
        Some(job.clone())
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// Set the queue-wide pause flag, returning whether it changed
    pub(crate) fn set_paused(&mut self, paused: bool) -> bool {
        let changed = self.paused != paused;
        self.paused = paused;
        changed
    }

    /// Drop every terminal job, returning their IDs
    pub(crate) fn remove_terminal(&mut self) -> Vec<JobId> {
        let ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.is_terminal())
            .map(|job| job.id)
            .collect();
        for id in &ids {
            self.jobs.remove(id);
            self.unlink(*id);
        }
        ids
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            queue_paused: self.paused,
            ..QueueStats::default()
        };
        for job in self.jobs.values() {
            stats.count(job.state);
        }
        stats
    }

    pub(crate) fn group_progress(&self, group_id: GroupId) -> GroupProgress {
        let mut stats = QueueStats {
            queue_paused: self.paused,
            ..QueueStats::default()
        };
        let mut percent_sum = 0.0f32;

        for job in self
            .jobs
            .values()
            .filter(|job| job.group_id == Some(group_id))
        {
            stats.count(job.state);
            percent_sum += if job.is_terminal() { 100.0 } else { job.percent };
        }

        let percent = if stats.total > 0 {
            percent_sum / stats.total as f32
        } else {
            0.0
        };

        GroupProgress {
            group_id: Some(group_id),
            stats,
            percent,
        }
    }
}

impl MediaDownloader {
    /// Submit a job for retrieval
    ///
    /// If the job's archive key is already in the archive, the job is created
    /// directly in `Skipped` state and no worker ever sees it. Otherwise it is
    /// appended to the ready queue in `Queued` state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has begun.
    pub async fn enqueue(&self, request: JobRequest) -> Result<Job> {
        self.submit(request, None).await
    }

    /// Submit several jobs as one group (a batch, playlist or channel)
    ///
    /// Every member is given `kind` and a fresh group ID, which can be used
    /// with [`group_progress`](Self::group_progress) and
    /// [`cancel_all`](Self::cancel_all).
    pub async fn enqueue_batch(
        &self,
        requests: Vec<JobRequest>,
        kind: JobKind,
    ) -> Result<(GroupId, Vec<Job>)> {
        let group_id = GroupId::next();
        let mut jobs = Vec::with_capacity(requests.len());

        for request in requests {
            jobs.push(self.submit(request.with_kind(kind), Some(group_id)).await?);
        }

        tracing::info!(group_id = %group_id, count = jobs.len(), kind = kind.as_str(), "Batch enqueued");
        Ok((group_id, jobs))
    }

    async fn submit(&self, request: JobRequest, group_id: Option<GroupId>) -> Result<Job> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let mut job = Job::from_request(request, group_id, JobState::Queued);
        if self.is_archived(&job.archive_key).await {
            job.state = JobState::Skipped;
        }

        self.queue_state.jobs.lock().await.insert(job.clone());

        if job.state == JobState::Skipped {
            tracing::info!(
                job_id = %job.id,
                source_ref = %job.source_ref,
                archive_key = %job.archive_key,
                "Job already archived, skipping"
            );
            self.emit_event(Event::Skipped { id: job.id });
            self.record_history(&job).await;
        } else {
            tracing::info!(job_id = %job.id, source_ref = %job.source_ref, "Job queued");
            self.emit_event(Event::Queued {
                id: job.id,
                source_ref: job.source_ref.clone(),
            });
            self.queue_state.job_available.notify_one();
        }

        Ok(job)
    }

    /// Whether `key` should be skipped as already retrieved
    pub(crate) async fn is_archived(&self, key: &ArchiveEntry) -> bool {
        self.config.archive.enabled && self.archive.contains(key).await
    }

    /// Snapshot of one job
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        self.queue_state
            .jobs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Job(JobError::NotFound { id }))
    }

    /// Snapshot of every in-memory job, oldest first
    pub async fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.queue_state.jobs.lock().await.iter().cloned().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Counts of in-memory jobs per state
    pub async fn queue_stats(&self) -> QueueStats {
        let mut stats = self.queue_state.jobs.lock().await.stats();
        stats.accepting_new = self.queue_state.accepting_new.load(Ordering::SeqCst);
        stats
    }

    /// Aggregate state and progress of one submission group
    pub async fn group_progress(&self, group_id: GroupId) -> GroupProgress {
        let mut progress = self.queue_state.jobs.lock().await.group_progress(group_id);
        progress.stats.accepting_new = self.queue_state.accepting_new.load(Ordering::SeqCst);
        progress
    }

    /// Remove every terminal job from memory
    ///
    /// History is not affected; terminal jobs were recorded when they finished.
    /// Returns the number of jobs removed.
    pub async fn clear_completed(&self) -> usize {
        let removed = self.queue_state.jobs.lock().await.remove_terminal();

        for id in &removed {
            self.emit_event(Event::Removed { id: *id });
        }
        tracing::debug!(count = removed.len(), "Cleared terminal jobs");

        removed.len()
    }

    /// Claim the next ready job for a worker slot and register its cancellation token
    pub(crate) async fn claim_next(&self) -> Option<(Job, CancellationToken)> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return None;
        }

        let mut jobs = self.queue_state.jobs.lock().await;
        let job = jobs.claim_next()?;

        let token = self.queue_state.shutdown_token.child_token();
        self.queue_state
            .active_jobs
            .lock()
            .await
            .insert(job.id, token.clone());

        Some((job, token))
    }

    /// Promote every scheduler entry due at `now`
    ///
    /// Retry entries go straight back to the ready queue. User-scheduled jobs
    /// pass the dedup check first and may end up `Skipped`. Returns the number
    /// of jobs that became `Queued`.
    pub(crate) async fn promote_due(&self, now: DateTime<Utc>) -> usize {
        let due = self.queue_state.scheduler.lock().await.pop_due(now);

        let mut promoted = 0;
        for entry in due {
            let queued = match entry.origin {
                ScheduleOrigin::Retry => self.promote_retry(entry.id).await,
                ScheduleOrigin::User => self.promote_scheduled(entry.id).await,
            };
            if queued {
                promoted += 1;
            }
        }
        promoted
    }

    async fn promote_retry(&self, id: JobId) -> bool {
        let mut jobs = self.queue_state.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        job.scheduled_at = None;

        match job.state {
            JobState::Retrying => {
                if let Err(e) = job.transition(JobState::Queued) {
                    tracing::warn!(job_id = %id, error = %e, "Could not requeue retrying job");
                    return false;
                }
                let source_ref = job.source_ref.clone();
                let attempt = job.attempt;
                jobs.link(id);
                drop(jobs);

                tracing::info!(job_id = %id, attempt, "Retry backoff elapsed, job requeued");
                self.emit_event(Event::Queued { id, source_ref });
                self.queue_state.job_available.notify_one();
                true
            }
            JobState::Paused if job.resume_to == Some(JobState::Retrying) => {
                // backoff elapsed while paused; resume straight into the queue
                job.resume_to = Some(JobState::Queued);
                jobs.link(id);
                tracing::debug!(job_id = %id, "Retry backoff elapsed while paused");
                false
            }
            _ => false,
        }
    }

    async fn promote_scheduled(&self, id: JobId) -> bool {
        let key = {
            let jobs = self.queue_state.jobs.lock().await;
            match jobs.get(id) {
                Some(job) if job.state == JobState::Scheduled => job.archive_key.clone(),
                _ => return false,
            }
        };

        let archived = self.is_archived(&key).await;

        let mut jobs = self.queue_state.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        // removed while the archive was consulted
        if job.state != JobState::Scheduled {
            return false;
        }
        job.scheduled_at = None;

        let next = if archived {
            JobState::Skipped
        } else {
            JobState::Queued
        };
        if let Err(e) = job.transition(next) {
            tracing::warn!(job_id = %id, error = %e, "Could not promote scheduled job");
            return false;
        }
        let snapshot = job.clone();
        if !archived {
            jobs.link(id);
        }
        drop(jobs);

        if archived {
            tracing::info!(job_id = %id, "Scheduled job already archived, skipping");
            self.emit_event(Event::Skipped { id });
            self.record_history(&snapshot).await;
            false
        } else {
            tracing::info!(job_id = %id, "Scheduled job is due, queued");
            self.emit_event(Event::Queued {
                id,
                source_ref: snapshot.source_ref,
            });
            self.queue_state.job_available.notify_one();
            true
        }
    }
}
