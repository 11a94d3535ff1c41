//! Shared fixtures

use spine_tracker::config::{FetcherConfig, SourceConfig, UserAgentConfig};
use spine_tracker::film::{FilmRecord, IdentityKey, MergeOutcome, RawFilmRecord, ReleaseStatus};
use spine_tracker::ingest::{Cadence, Pipeline, RateLimitedFetcher, Scheduler, DEFAULT_INTERVAL};
use spine_tracker::state::IngestionRun;
use spine_tracker::storage::{
    FilmFilter, Repository, SqliteRepository, StorageError, StorageResult,
};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestTracker".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

/// Short spacing and backoff so tests stay fast
pub fn fetcher_config(spacing_ms: u64, max_retries: u32) -> FetcherConfig {
    FetcherConfig {
        request_spacing_ms: spacing_ms,
        max_retries,
        retry_backoff_ms: 10,
        max_backoff_ms: 50,
        request_timeout_secs: 5,
        connect_timeout_secs: 2,
    }
}

pub fn fetcher(spacing_ms: u64, max_retries: u32) -> RateLimitedFetcher {
    RateLimitedFetcher::new(&fetcher_config(spacing_ms, max_retries), &user_agent()).unwrap()
}

pub fn source(name: &str, url: String, release_status: ReleaseStatus) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url,
        release_status,
    }
}

/// One catalog card in the shape the live site uses
pub fn card(title: &str, spine: u32, price: &str) -> String {
    format!(
        r#"<div class="product-card">
            <a href="/films/{spine}"><h3>{title}</h3></a>
            <span class="spine">#{spine}</span>
            <span class="price">{price}</span>
            <span class="format">Blu-ray</span>
        </div>"#
    )
}

pub fn page(cards: &[String]) -> String {
    format!(
        "<html><head><title>Catalog</title></head><body><main>{}</main></body></html>",
        cards.join("\n")
    )
}

pub fn memory_repository() -> Arc<dyn Repository> {
    Arc::new(SqliteRepository::in_memory().unwrap())
}

pub fn scheduler(
    sources: Vec<SourceConfig>,
    fetcher: RateLimitedFetcher,
    repository: Arc<dyn Repository>,
) -> Scheduler {
    let pipeline = Pipeline::new(sources, fetcher, Arc::clone(&repository));
    Scheduler::new(pipeline, Cadence::Interval(DEFAULT_INTERVAL), repository)
}

/// Repository that starts rejecting upserts after a number of successes
pub struct FailingRepository {
    inner: SqliteRepository,
    upserts_allowed: usize,
    upserts: AtomicUsize,
}

impl FailingRepository {
    pub fn new(upserts_allowed: usize) -> Self {
        Self {
            inner: SqliteRepository::in_memory().unwrap(),
            upserts_allowed,
            upserts: AtomicUsize::new(0),
        }
    }
}

impl Repository for FailingRepository {
    fn upsert(&self, record: &RawFilmRecord) -> StorageResult<MergeOutcome> {
        if self.upserts.fetch_add(1, Ordering::SeqCst) >= self.upserts_allowed {
            return Err(StorageError::Database("disk I/O error".to_string()));
        }
        self.inner.upsert(record)
    }

    fn get(&self, key: &IdentityKey) -> StorageResult<Option<FilmRecord>> {
        self.inner.get(key)
    }

    fn list(&self, filter: &FilmFilter) -> StorageResult<Vec<FilmRecord>> {
        self.inner.list(filter)
    }

    fn count_matching(&self, filter: &FilmFilter) -> StorageResult<u64> {
        self.inner.count_matching(filter)
    }

    fn count(&self) -> StorageResult<u64> {
        self.inner.count()
    }

    fn count_by_status(&self, status: ReleaseStatus) -> StorageResult<u64> {
        self.inner.count_by_status(status)
    }

    fn count_released_since(&self, since: NaiveDate) -> StorageResult<u64> {
        self.inner.count_released_since(since)
    }

    fn record_run(&self, run: &IngestionRun) -> StorageResult<()> {
        self.inner.record_run(run)
    }

    fn latest_run(&self) -> StorageResult<Option<IngestionRun>> {
        self.inner.latest_run()
    }
}
