//! Spine Tracker: a catalog release tracker
//!
//! This crate ingests film catalog pages from a small set of configured
//! sources, extracts film cards, merges them into a local SQLite snapshot,
//! and runs that pipeline on a timer or on demand with at most one run
//! active at a time.

pub mod api;
pub mod config;
pub mod film;
pub mod ingest;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Spine Tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] ingest::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Invalid run transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::RunStatus,
        to: state::RunStatus,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Spine Tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use film::{FilmRecord, IdentityKey, MergeOutcome, RawFilmRecord, ReleaseStatus};
pub use ingest::{Pipeline, RateLimitedFetcher, RunAccepted, RunAlreadyActive, Scheduler};
pub use state::{IngestionRun, RunStatus, SchedulerStatus, TriggerSource};
pub use storage::{Repository, SqliteRepository};
