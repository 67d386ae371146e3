use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A table or column name is not a plain SQL identifier
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The row violates a uniqueness constraint (e.g. a link already stored)
    #[error("Row already exists: {0}")]
    Conflict(String),

    /// A record could not be converted into a property map
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error: lock contention and unique violations get
    /// their own variants, everything else is wrapped as-is.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return DatabaseError::Conflict(db_err.message().to_owned());
            }
        }

        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A validated feed as persisted in the entries table.
///
/// Only `link`, `title`, `description`, `status_code` and the optional
/// channel metadata come from the fetch. The remaining columns are NOT NULL
/// in the store schema but unused by the ingest pipeline; they are always
/// written with the associated-constant defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeedRecord {
    pub link: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status_code: i64,
    pub thumbnail: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub source_url: String,
    pub permanent: bool,
    pub bookmarked: bool,
    pub contents_type: i64,
    pub page_rating: i64,
    pub page_rating_votes: i64,
    pub page_rating_contents: i64,
    pub manual_status_code: i64,
    /// Unix timestamp (seconds) of insertion
    pub date_created: i64,
}

impl FeedRecord {
    pub const SOURCE_URL: &'static str = "";
    pub const PERMANENT: bool = false;
    pub const BOOKMARKED: bool = false;
    pub const CONTENTS_TYPE: i64 = 0;
    pub const PAGE_RATING: i64 = 0;
    pub const PAGE_RATING_VOTES: i64 = 0;
    pub const PAGE_RATING_CONTENTS: i64 = 0;
    pub const MANUAL_STATUS_CODE: i64 = 0;

    /// Creates a record for `link` with every store-only column at its default.
    pub fn new(link: impl Into<String>, status_code: i64) -> Self {
        Self {
            link: link.into(),
            title: None,
            description: None,
            status_code,
            thumbnail: None,
            language: None,
            author: None,
            source_url: Self::SOURCE_URL.to_owned(),
            permanent: Self::PERMANENT,
            bookmarked: Self::BOOKMARKED,
            contents_type: Self::CONTENTS_TYPE,
            page_rating: Self::PAGE_RATING,
            page_rating_votes: Self::PAGE_RATING_VOTES,
            page_rating_contents: Self::PAGE_RATING_CONTENTS,
            manual_status_code: Self::MANUAL_STATUS_CODE,
            date_created: chrono::Utc::now().timestamp(),
        }
    }

    /// Converts the record into the column → value map accepted by
    /// [`Database::insert_json_data`](super::Database::insert_json_data).
    pub fn to_properties(&self) -> Result<serde_json::Map<String, serde_json::Value>, DatabaseError> {
        // A struct always serializes to an object
        Ok(serde_json::to_value(self)?
            .as_object()
            .cloned()
            .unwrap_or_default())
    }
}

/// Counters of [`Database::merge_from`](super::Database::merge_from).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records read from the other store
    pub read: usize,
    pub copied: usize,
    /// Records whose link was already stored
    pub present: usize,
}
