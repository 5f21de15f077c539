//! History management operations.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::DatabaseError;
use crate::retry::{ClassifiedError, FailureKind};
use crate::types::{GroupId, HistoryRecord, JobId, JobKind, JobState};
use crate::{Error, Result};

use super::{Database, HistoryQuery, HistoryRow, HistoryStore};

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn corrupt(field: &str, value: &str) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "unrecognised {field} {value:?} in history"
    )))
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let kind = JobKind::parse(&row.kind).ok_or_else(|| corrupt("kind", &row.kind))?;
        let final_state =
            JobState::parse(&row.final_state).ok_or_else(|| corrupt("state", &row.final_state))?;

        let result = row
            .result_metadata
            .as_deref()
            .map(serde_json::from_str::<crate::engine::ResultMetadata>)
            .transpose()?;

        let error = row.error_kind.map(|code| ClassifiedError {
            kind: FailureKind::from_code(&code).unwrap_or(FailureKind::Unknown),
            reason: row.error_reason.unwrap_or_default(),
            raw: row.raw_error.unwrap_or_default(),
        });

        Ok(HistoryRecord {
            job_id: JobId(row.job_id as u64),
            source_ref: row.source_ref,
            kind,
            group_id: row.group_id.map(|g| GroupId(g as u64)),
            final_state,
            attempts: row.attempts as u32,
            created_at: from_millis(row.created_at),
            finished_at: from_millis(row.finished_at),
            result,
            error,
            reason: row.reason.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl HistoryStore for Database {
    async fn record(&self, record: &HistoryRecord) -> Result<()> {
        let result_metadata = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO history (
                job_id, source_ref, kind, group_id, final_state, attempts,
                created_at, finished_at, result_metadata,
                error_kind, error_reason, raw_error, reason
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.job_id.get() as i64)
        .bind(&record.source_ref)
        .bind(record.kind.as_str())
        .bind(record.group_id.map(|g| g.0 as i64))
        .bind(record.final_state.as_str())
        .bind(record.attempts as i64)
        .bind(record.created_at.timestamp_millis())
        .bind(record.finished_at.timestamp_millis())
        .bind(result_metadata)
        .bind(record.error.as_ref().map(|e| e.kind.code()))
        .bind(record.error.as_ref().map(|e| e.reason.as_str()))
        .bind(record.error.as_ref().map(|e| e.raw.as_str()))
        .bind(&record.reason)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let rows = match query.state {
            Some(state) => sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT job_id, source_ref, kind, group_id, final_state, attempts,
                       created_at, finished_at, result_metadata,
                       error_kind, error_reason, raw_error, reason
                FROM history
                WHERE final_state = ?
                ORDER BY finished_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(state.as_str()),
            None => sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT job_id, source_ref, kind, group_id, final_state, attempts,
                       created_at, finished_at, result_metadata,
                       error_kind, error_reason, raw_error, reason
                FROM history
                ORDER BY finished_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            ),
        }
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        rows.into_iter().map(HistoryRecord::try_from).collect()
    }

    async fn count(&self, state: Option<JobState>) -> Result<u64> {
        let count = match state {
            Some(state) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history WHERE final_state = ?")
                    .bind(state.as_str())
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(Error::Sqlx)?;

        Ok(count as u64)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM history")
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }

    async fn prune(&self, keep: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM history
            WHERE id NOT IN (
                SELECT id FROM history
                ORDER BY finished_at DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}
