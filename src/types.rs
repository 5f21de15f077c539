//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::archive::ArchiveEntry;
use crate::engine::ResultMetadata;
use crate::error::JobError;
use crate::retry::{ClassifiedError, FailureKind};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a job
///
/// Identifiers come from a process-wide counter and are never reused while the
/// process lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Allocate the next unused job ID
    pub(crate) fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<JobId> for u64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identifier linking the jobs created from one batch, playlist or channel submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl GroupId {
    /// Allocate a fresh group ID
    pub fn next() -> Self {
        Self(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of submission produced a job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A single item submitted on its own
    #[default]
    Single,
    /// One entry of a pasted list of URLs
    BatchMember,
    /// One entry of an expanded playlist
    PlaylistMember,
    /// One entry of an expanded channel listing
    ChannelMember,
    /// Recording of a live stream
    LiveCapture,
    /// Submitted with a future start time
    Scheduled,
}

impl JobKind {
    /// Stable lowercase name, used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::BatchMember => "batch_member",
            JobKind::PlaylistMember => "playlist_member",
            JobKind::ChannelMember => "channel_member",
            JobKind::LiveCapture => "live_capture",
            JobKind::Scheduled => "scheduled",
        }
    }

    /// Parse a name produced by [`JobKind::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "single" => JobKind::Single,
            "batch_member" => JobKind::BatchMember,
            "playlist_member" => JobKind::PlaylistMember,
            "channel_member" => JobKind::ChannelMember,
            "live_capture" => JobKind::LiveCapture,
            "scheduled" => JobKind::Scheduled,
            _ => return None,
        })
    }
}

/// Job lifecycle state
///
/// ```text
/// Scheduled ──► Queued ──► Downloading ──► Completed | Failed | Cancelled | Skipped
///                  ▲            │
///                  │            ▼
///                  └──────── Retrying
///
/// Queued / Retrying ◄──► Paused
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Held by the scheduler until its start time
    Scheduled,
    /// Ready, waiting for a free worker slot
    Queued,
    /// Owned by exactly one worker; engine call in progress
    Downloading,
    /// Last attempt failed transiently; waiting for its backoff delay
    Retrying,
    /// Held back from claiming by the user
    Paused,
    /// Engine reported success
    Completed,
    /// Retries exhausted or failure not retryable
    Failed,
    /// Stopped by the user
    Cancelled,
    /// Already present in the archive; never executed
    Skipped,
}

impl JobState {
    /// Whether the orchestrator will never move a job out of this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Skipped
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match self {
            Scheduled => matches!(next, Queued | Skipped | Cancelled),
            Queued => matches!(next, Downloading | Paused | Cancelled | Failed),
            Downloading => matches!(next, Completed | Retrying | Failed | Cancelled | Skipped),
            Retrying => matches!(next, Queued | Paused | Cancelled | Failed),
            Paused => matches!(next, Queued | Retrying | Cancelled | Failed),
            Completed | Failed | Cancelled | Skipped => false,
        }
    }

    /// Stable lowercase name, used for persistence and display
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Retrying => "retrying",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Skipped => "skipped",
        }
    }

    /// Parse a persisted state name
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "scheduled" => JobState::Scheduled,
            "queued" => JobState::Queued,
            "downloading" => JobState::Downloading,
            "retrying" => JobState::Retrying,
            "paused" => JobState::Paused,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "cancelled" => JobState::Cancelled,
            "skipped" => JobState::Skipped,
            _ => return None,
        })
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job submission as made by the presentation layer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRequest {
    /// Identity of the target resource (canonical URL or `provider:id`)
    pub source_ref: String,

    /// Submission kind
    #[serde(default)]
    pub kind: JobKind,

    /// Engine options, passed through untouched
    #[serde(default)]
    pub spec: serde_json::Value,

    /// Explicit dedup key; derived from `source_ref` when absent
    #[serde(default)]
    pub archive_key: Option<ArchiveEntry>,
}

impl JobRequest {
    /// Create a request for a single item with the given engine options
    pub fn new(source_ref: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            source_ref: source_ref.into(),
            kind: JobKind::Single,
            spec,
            archive_key: None,
        }
    }

    /// Set the submission kind
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    /// Override the archive key used for dedup
    pub fn with_archive_key(mut self, key: ArchiveEntry) -> Self {
        self.archive_key = Some(key);
        self
    }
}

/// One retrieval unit tracked by the orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Unique, immutable identifier
    pub id: JobId,
    /// Identity of the target resource
    pub source_ref: String,
    /// Dedup identity derived from `source_ref`
    pub archive_key: ArchiveEntry,
    /// Submission kind
    pub kind: JobKind,
    /// Engine options, passed through untouched
    pub spec: serde_json::Value,
    /// Current lifecycle state
    pub state: JobState,
    /// Number of engine invocations so far
    pub attempt: u32,
    /// When the scheduler will promote this job (user schedule or retry backoff)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Classified failure of the most recent failed attempt
    pub last_error: Option<ClassifiedError>,
    /// Engine result of a completed job
    pub result: Option<ResultMetadata>,
    /// Last reported progress percentage (0.0 to 100.0)
    pub percent: f32,
    /// Group this job was submitted with
    pub group_id: Option<GroupId>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job last changed
    pub updated_at: DateTime<Utc>,
    /// State to return to when a paused job is resumed
    #[serde(skip)]
    pub(crate) resume_to: Option<JobState>,
}

const REASON_COMPLETED: &str = "Download completed.";
const REASON_FAILED: &str = "The download failed.";
const REASON_CANCELLED: &str = "The download was cancelled.";
const REASON_SKIPPED: &str = "Already in the download archive.";

impl Job {
    /// Build a job from a request; the caller decides the initial state
    pub(crate) fn from_request(
        request: JobRequest,
        group_id: Option<GroupId>,
        state: JobState,
    ) -> Self {
        let now = Utc::now();
        let archive_key = request
            .archive_key
            .unwrap_or_else(|| ArchiveEntry::from_source_ref(&request.source_ref));

        Self {
            id: JobId::next(),
            source_ref: request.source_ref,
            archive_key,
            kind: request.kind,
            spec: request.spec,
            state,
            attempt: 0,
            scheduled_at: None,
            last_error: None,
            result: None,
            percent: 0.0,
            group_id,
            created_at: now,
            updated_at: now,
            resume_to: None,
        }
    }

    /// Whether the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Short user-facing explanation of a terminal state; `None` while the job
    /// is still live
    pub fn status_reason(&self) -> Option<String> {
        match self.state {
            JobState::Completed => Some(REASON_COMPLETED.to_string()),
            JobState::Failed => Some(
                self.last_error
                    .as_ref()
                    .map_or_else(|| REASON_FAILED.to_string(), |e| e.reason.clone()),
            ),
            JobState::Cancelled => Some(REASON_CANCELLED.to_string()),
            JobState::Skipped => Some(REASON_SKIPPED.to_string()),
            _ => None,
        }
    }

    /// Move the job to `next`, enforcing the state machine
    pub(crate) fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(next) {
            return Err(JobError::InvalidState {
                id: self.id,
                operation: format!("move to {next}"),
                current_state: self.state,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job entered the ready queue
    Queued {
        /// Job ID
        id: JobId,
        /// Target resource
        source_ref: String,
    },

    /// Job registered with the scheduler for a future start
    Scheduled {
        /// Job ID
        id: JobId,
        /// When it becomes ready
        at: DateTime<Utc>,
    },

    /// Job found in the archive; never executed
    Skipped {
        /// Job ID
        id: JobId,
    },

    /// A worker claimed the job and invoked the engine
    Started {
        /// Job ID
        id: JobId,
        /// Attempt number, starting at 1
        attempt: u32,
    },

    /// Throttled progress update
    Progress(ProgressUpdate),

    /// Attempt failed transiently; a retry is scheduled
    Retrying {
        /// Job ID
        id: JobId,
        /// Attempts made so far
        attempt: u32,
        /// Backoff before the job is queued again
        #[serde(with = "humantime_serde")]
        delay: Duration,
        /// Human-readable reason
        reason: String,
    },

    /// Job completed successfully
    Completed {
        /// Job ID
        id: JobId,
        /// Engine-provided result metadata
        result: ResultMetadata,
    },

    /// Job failed permanently
    Failed {
        /// Job ID
        id: JobId,
        /// Failure classification
        kind: FailureKind,
        /// Human-readable reason
        reason: String,
    },

    /// Job cancelled
    Cancelled {
        /// Job ID
        id: JobId,
    },

    /// Job paused
    Paused {
        /// Job ID
        id: JobId,
    },

    /// Job resumed
    Resumed {
        /// Job ID
        id: JobId,
    },

    /// Terminal job removed from memory by `clear_completed`
    Removed {
        /// Job ID
        id: JobId,
    },

    /// Queue-wide pause: no new claims
    QueuePaused,

    /// Queue-wide resume
    QueueResumed,

    /// Orchestrator is shutting down
    Shutdown,
}

/// Structured progress for one job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Job ID
    pub job_id: JobId,
    /// Percentage (0.0 to 100.0)
    pub percent: f32,
    /// Transfer rate in bytes per second
    pub rate_bps: Option<u64>,
    /// Estimated time remaining
    #[serde(with = "humantime_serde")]
    pub eta: Option<Duration>,
}

/// Counts of in-memory jobs per state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total jobs held in memory
    pub total: usize,
    /// Held by the scheduler
    pub scheduled: usize,
    /// Waiting for a worker
    pub queued: usize,
    /// Engine call in progress
    pub downloading: usize,
    /// Waiting for a retry backoff
    pub retrying: usize,
    /// Paused by the user
    pub paused: usize,
    /// Completed successfully
    pub completed: usize,
    /// Failed permanently
    pub failed: usize,
    /// Cancelled by the user
    pub cancelled: usize,
    /// Skipped as already archived
    pub skipped: usize,
    /// Whether the queue-wide pause flag is set
    pub queue_paused: bool,
    /// Whether new jobs are accepted
    pub accepting_new: bool,
}

impl QueueStats {
    pub(crate) fn count(&mut self, state: JobState) {
        self.total += 1;
        match state {
            JobState::Scheduled => self.scheduled += 1,
            JobState::Queued => self.queued += 1,
            JobState::Downloading => self.downloading += 1,
            JobState::Retrying => self.retrying += 1,
            JobState::Paused => self.paused += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
            JobState::Cancelled => self.cancelled += 1,
            JobState::Skipped => self.skipped += 1,
        }
    }
}

/// Aggregate progress of a batch, playlist or channel submission
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupProgress {
    /// Group ID
    pub group_id: Option<GroupId>,
    /// Member counts per state
    pub stats: QueueStats,
    /// Mean progress over all members; terminal members count as 100%
    pub percent: f32,
}

impl GroupProgress {
    /// Whether every member reached a terminal state
    pub fn is_finished(&self) -> bool {
        let s = &self.stats;
        s.total > 0 && s.completed + s.failed + s.cancelled + s.skipped == s.total
    }
}

/// Record handed to the history store for every job that reaches a terminal state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Job ID
    pub job_id: JobId,
    /// Target resource
    pub source_ref: String,
    /// Submission kind
    pub kind: JobKind,
    /// Group the job belonged to
    pub group_id: Option<GroupId>,
    /// Terminal state
    pub final_state: JobState,
    /// Engine invocations made
    pub attempts: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job reached its terminal state
    pub finished_at: DateTime<Utc>,
    /// Engine result for completed jobs
    pub result: Option<ResultMetadata>,
    /// Classified failure for failed jobs
    pub error: Option<ClassifiedError>,
    /// Short user-facing explanation of the final state
    pub reason: String,
}

impl HistoryRecord {
    pub(crate) fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            source_ref: job.source_ref.clone(),
            kind: job.kind,
            group_id: job.group_id,
            final_state: job.state,
            attempts: job.attempt,
            created_at: job.created_at,
            finished_at: job.updated_at,
            result: job.result.clone(),
            error: job.last_error.clone(),
            reason: job.status_reason().unwrap_or_default(),
        }
    }
}

/// Optional capabilities discovered at startup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Path of a usable transcoder binary, if one was found
    pub transcoder: Option<std::path::PathBuf>,
    /// Name of the configured download engine
    pub engine: String,
}
