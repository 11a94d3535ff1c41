//! Storage traits and error types
//!
//! This module defines the trait interface for film repositories and the
//! associated error types.

use crate::film::{FilmRecord, IdentityKey, MergeOutcome, RawFilmRecord, ReleaseStatus};
use crate::state::IngestionRun;
use crate::storage::FilmFilter;
use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Any of these returned from [`Repository::upsert`] aborts the current run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for film repository implementations
///
/// Methods take `&self`; implementations serialize writers internally so a
/// repository can be shared between the ingestion path and the API behind an
/// `Arc`.
pub trait Repository: Send + Sync {
    // ===== Films =====

    /// Merges one extracted record by identity key
    ///
    /// Inserts when no record matches, otherwise overwrites the fields that
    /// differ. The `updated_at` watermark is refreshed either way.
    fn upsert(&self, record: &RawFilmRecord) -> StorageResult<MergeOutcome>;

    /// Gets a film by identity key
    fn get(&self, key: &IdentityKey) -> StorageResult<Option<FilmRecord>>;

    /// Lists films matching the filter, newest release first
    ///
    /// Ties on release date (and films with no date, which sort last) are
    /// broken by spine number, then by identity key for films without one.
    fn list(&self, filter: &FilmFilter) -> StorageResult<Vec<FilmRecord>>;

    /// Counts films matching the filter, ignoring its pagination
    fn count_matching(&self, filter: &FilmFilter) -> StorageResult<u64>;

    /// Counts every stored film
    fn count(&self) -> StorageResult<u64>;

    /// Counts films with the given release status
    fn count_by_status(&self, status: ReleaseStatus) -> StorageResult<u64>;

    /// Counts released films whose release date is on or after `since`
    fn count_released_since(&self, since: NaiveDate) -> StorageResult<u64>;

    /// Every stored film, in listing order
    fn all(&self) -> StorageResult<Vec<FilmRecord>> {
        self.list(&FilmFilter::default())
    }

    // ===== Run history =====

    /// Stores a finished run, replacing any row with the same id
    fn record_run(&self, run: &IngestionRun) -> StorageResult<()>;

    /// Gets the run with the highest id
    fn latest_run(&self) -> StorageResult<Option<IngestionRun>>;
}
