//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// Statements of each schema version, applied in order
const MIGRATIONS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            r#"
            CREATE TABLE history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                source_ref TEXT NOT NULL,
                kind TEXT NOT NULL,
                group_id INTEGER,
                final_state TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                result_metadata TEXT,
                error_kind TEXT,
                error_reason TEXT,
                raw_error TEXT
            )
            "#,
            "CREATE INDEX idx_history_finished_at ON history(finished_at DESC)",
            "CREATE INDEX idx_history_final_state ON history(final_state)",
            "CREATE INDEX idx_history_group_id ON history(group_id)",
        ],
    ),
    // user-facing reason of the final state
    (2, &["ALTER TABLE history ADD COLUMN reason TEXT"]),
];

fn connection_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!("{context}: {e}")))
}

impl Database {
    /// Open (or create) the history database at `path`
    ///
    /// Creates the parent directory and the file if needed and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| connection_failed("Failed to create database directory", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| connection_failed("Failed to parse database path", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| connection_failed("Failed to connect to database", e))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open a private in-memory database
    ///
    /// The pool holds exactly one long-lived connection, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| connection_failed("Failed to parse database path", e))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| connection_failed("Failed to open in-memory database", e))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Current schema version (0 for an empty database)
    pub async fn schema_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {e}"
                )))
            })?;
        Ok(version.unwrap_or(0))
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| connection_failed("Failed to acquire connection", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create schema_version table", e))?;

        let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {e}"
                )))
            })?;
        let current = current.unwrap_or(0);

        for (version, statements) in MIGRATIONS {
            if *version > current {
                Self::apply_migration(&mut conn, *version, statements).await?;
            }
        }

        Ok(())
    }

    /// Apply one schema version inside a transaction
    async fn apply_migration(
        conn: &mut SqliteConnection,
        version: i64,
        statements: &[&str],
    ) -> Result<()> {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("Failed to begin transaction", e))?;

        let result = async {
            for statement in statements {
                sqlx::query(statement)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| migration_failed(&format!("Migration v{version} failed"), e))?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(|e| migration_failed("Failed to record migration", e))?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| migration_failed(&format!("Failed to commit migration v{version}"), e))?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
