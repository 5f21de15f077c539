//! Time-ordered holding area for jobs that must not run yet.
//!
//! Two kinds of entries live here:
//! - user-scheduled jobs, waiting for the start time they were submitted with
//! - jobs waiting out a retry backoff
//!
//! Both are promoted by the same periodic tick (see
//! [`SchedulerTask`](crate::scheduler_task::SchedulerTask)), so retry delays
//! and scheduled downloads share one timer mechanism.
//!
//! Entries are kept in a min-heap keyed by due time. Removal is lazy: the
//! heap may still contain entries for removed or rescheduled jobs, which are
//! discarded when they reach the top.
//!
//! # Example
//!
//! ```rust
//! use media_dl::scheduler::{ScheduleOrigin, Scheduler};
//! use media_dl::types::JobId;
//! use chrono::{Duration, Utc};
//!
//! let mut scheduler = Scheduler::new();
//! let now = Utc::now();
//!
//! scheduler.insert(JobId(1), now + Duration::seconds(10), ScheduleOrigin::User);
//! assert!(scheduler.pop_due(now).is_empty());
//!
//! assert!(scheduler.remove(JobId(1)));
//! assert!(!scheduler.remove(JobId(1)));
//! ```

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::types::JobId;

/// Why a job is held by the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleOrigin {
    /// Submitted with a future start time; passes the dedup check when promoted
    User,
    /// Waiting out a retry backoff; already passed dedup once
    Retry,
}

/// An entry that has come due
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DueEntry {
    /// Job to promote
    pub id: JobId,
    /// When it was due
    pub at: DateTime<Utc>,
    /// Why it was held
    pub origin: ScheduleOrigin,
}

#[derive(Clone, Copy, Debug)]
struct Live {
    seq: u64,
    at: DateTime<Utc>,
    origin: ScheduleOrigin,
}

/// Min-heap of future-dated jobs
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, JobId)>>,
    live: HashMap<JobId, Live>,
    next_seq: u64,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `id` until `at`
    ///
    /// Inserting a job that is already held replaces its due time and origin.
    pub fn insert(&mut self, id: JobId, at: DateTime<Utc>, origin: ScheduleOrigin) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((at, seq, id)));
        self.live.insert(id, Live { seq, at, origin });
    }

    /// Stop holding `id`
    ///
    /// Returns `false` if the job was not held, so calling it twice is harmless.
    pub fn remove(&mut self, id: JobId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Whether `id` is currently held
    pub fn contains(&self, id: JobId) -> bool {
        self.live.contains_key(&id)
    }

    /// Due time of `id`, if held
    pub fn due_at(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.live.get(&id).map(|l| l.at)
    }

    /// Remove and return every entry due at or before `now`, earliest first
    ///
    /// Entries with equal due times come out in insertion order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<DueEntry> {
        let mut due = Vec::new();

        while let Some(Reverse((at, seq, id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();

            // stale heap entries belong to removed or rescheduled jobs
            let current = self.live.get(&id).is_some_and(|l| l.seq == seq);
            if current && let Some(live) = self.live.remove(&id) {
                due.push(DueEntry {
                    id,
                    at,
                    origin: live.origin,
                });
            }
        }

        due
    }

    /// Earliest due time among held jobs
    pub fn next_due(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse((at, seq, id))) = self.heap.peek().copied() {
            if self.live.get(&id).is_some_and(|l| l.seq == seq) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of jobs currently held
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no job is held
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
