//! Output module for exports and reports
//!
//! This module handles:
//! - Exporting the catalog snapshot as JSON or TSV files
//! - Computing and printing catalog statistics

mod export;
pub mod stats;

pub use export::{export_films, ExportFormat, ExportSummary};
pub use stats::{load_statistics, print_statistics, CatalogStatistics};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Unknown export format '{0}' (expected json or tsv)")]
    UnknownFormat(String),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
