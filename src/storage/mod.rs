//! Storage module for the film catalog snapshot
//!
//! This module handles all database operations for the tracker, including:
//! - SQLite database initialization and schema management
//! - Identity-keyed merging of extracted film records
//! - Filtered, paginated listing for the API and export
//! - Run history persistence

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteRepository;
pub use traits::{Repository, StorageError, StorageResult};

use crate::film::ReleaseStatus;
use std::path::Path;

/// Opens (creating if needed) the SQLite repository at `path`
pub fn open_repository(path: &Path) -> StorageResult<SqliteRepository> {
    SqliteRepository::open(path)
}

/// Selection and pagination for [`Repository::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilmFilter {
    pub release_status: Option<ReleaseStatus>,

    /// Case-insensitive substring matched against title and director
    pub search: Option<String>,

    pub offset: u64,

    /// `None` returns every remaining row
    pub limit: Option<u64>,
}

impl FilmFilter {
    pub fn with_status(mut self, status: ReleaseStatus) -> Self {
        self.release_status = Some(status);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        let trimmed = search.trim();
        self.search = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}
