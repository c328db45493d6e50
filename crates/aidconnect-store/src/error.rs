use thiserror::Error;

use aidconnect_shared::ValidationError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// An insert collided with a uniqueness constraint.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A write would break a model invariant.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// JSON column encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

impl StoreError {
    /// Map a failed `INSERT`, surfacing UNIQUE / PRIMARY KEY violations as
    /// [`StoreError::DuplicateKey`].
    pub(crate) fn from_insert(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::DuplicateKey(msg.clone().unwrap_or_else(|| "unique constraint".to_string()))
            }
            other => StoreError::Sqlite(other),
        }
    }

    /// Map `QueryReturnedNoRows` to [`StoreError::NotFound`].
    pub(crate) fn from_query(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
