//! Ingestion module: getting catalog pages into the repository
//!
//! This module contains the core ingestion logic, including:
//! - Rate-limited HTTP fetching with retry logic
//! - Film card extraction from catalog HTML
//! - Sequential run execution across configured sources
//! - Run admission, status, and the timed trigger loop

mod extractor;
mod fetcher;
mod pipeline;
mod scheduler;

pub use extractor::{parse_release_date, ExtractError, RecordExtractor};
pub use fetcher::{FetchError, RateLimitedFetcher, RetryPolicy};
pub use pipeline::Pipeline;
pub use scheduler::{Cadence, RunAccepted, RunAlreadyActive, Scheduler, TimerHandle, DEFAULT_INTERVAL};
