use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

/// Table holding one row per stored link.
pub const ENTRIES_TABLE: &str = "linkdatamodel";

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a single-connection handle and run migrations.
    ///
    /// The ingest pipeline opens one handle per batch, so one connection is
    /// the whole budget; SQLite serializes writers anyway.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        Self::open_with(path, 1).await
    }

    /// Open a handle backed by up to `max_connections` connections.
    ///
    /// `:memory:` databases are private to a connection, so callers sharing
    /// one in-memory database must keep `max_connections` at 1.
    pub async fn open_with(path: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Using pragma() makes every pooled
        // connection inherit it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // No idle/lifetime reaping: dropping the only connection of a
        // `:memory:` database would drop the data with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;

        tracing::debug!(path = %path, max_connections, "Opened entry store");
        Ok(db)
    }

    /// Open an existing database read-only, without running migrations.
    ///
    /// For stores owned by someone else (the places store read by
    /// `convert`): nothing is created in the file, and writes fail.
    ///
    /// # Errors
    ///
    /// Fails if the file does not exist or cannot be opened.
    pub async fn open_read_only(path: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=ro", path))
            .map_err(DatabaseError::from_sqlx)?
            .read_only(true)
            .pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tracing::debug!(path = %path, "Opened store read-only");
        Ok(Self { pool })
    }

    /// Close every connection of this handle, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the entries table if it does not exist yet.
    ///
    /// Idempotent: runs on every open. Wrapped in a transaction so a failed
    /// migration leaves the database untouched.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {ENTRIES_TABLE} (
                id INTEGER PRIMARY KEY,
                link TEXT UNIQUE NOT NULL,
                title TEXT,
                description TEXT,
                status_code INTEGER NOT NULL DEFAULT 0,
                thumbnail TEXT,
                language TEXT,
                author TEXT,
                source_url TEXT NOT NULL DEFAULT '',
                permanent INTEGER NOT NULL DEFAULT 0,
                bookmarked INTEGER NOT NULL DEFAULT 0,
                contents_type INTEGER NOT NULL DEFAULT 0,
                page_rating INTEGER NOT NULL DEFAULT 0,
                page_rating_votes INTEGER NOT NULL DEFAULT 0,
                page_rating_contents INTEGER NOT NULL DEFAULT 0,
                manual_status_code INTEGER NOT NULL DEFAULT 0,
                date_created INTEGER NOT NULL DEFAULT 0
            )
        "#
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
