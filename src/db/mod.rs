//! Database layer for media-dl
//!
//! Terminal jobs are written to a SQLite history table so that they survive
//! restarts and can be browsed after [`clear_completed`] drops them from the
//! live queue.
//!
//! ## Submodules
//!
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`history`]: [`HistoryStore`] implementation
//!
//! [`clear_completed`]: crate::MediaDownloader::clear_completed

use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::Result;
use crate::types::{HistoryRecord, JobState};

mod history;
mod migrations;

/// Filter and pagination for history queries
#[derive(Clone, Debug)]
pub struct HistoryQuery {
    /// Only return records that ended in this state
    pub state: Option<JobState>,
    /// Maximum number of records to return
    pub limit: usize,
    /// Number of records to skip
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            state: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl HistoryQuery {
    /// Records that ended in `state`
    pub fn with_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }
}

/// Persistent record of jobs that reached a terminal state
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist one terminal job
    async fn record(&self, record: &HistoryRecord) -> Result<()>;

    /// Records matching `query`, most recently finished first
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>>;

    /// Number of records, optionally restricted to one final state
    async fn count(&self, state: Option<JobState>) -> Result<u64>;

    /// Delete every record, returning how many were removed
    async fn clear(&self) -> Result<u64>;

    /// Delete all but the `keep` most recent records
    async fn prune(&self, keep: u32) -> Result<u64>;
}

/// History record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
struct HistoryRow {
    job_id: i64,
    source_ref: String,
    kind: String,
    group_id: Option<i64>,
    final_state: String,
    attempts: i64,
    created_at: i64,
    finished_at: i64,
    result_metadata: Option<String>,
    error_kind: Option<String>,
    error_reason: Option<String>,
    raw_error: Option<String>,
    reason: Option<String>,
}

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}
