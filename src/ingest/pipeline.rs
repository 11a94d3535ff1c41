//! Run execution: fetch, extract, merge
//!
//! Sources are processed one at a time in configured order, and records in
//! extraction order, so a given set of fetch outcomes always produces the
//! same counters and the same repository state.

use crate::config::SourceConfig;
use crate::ingest::{FetchError, RateLimitedFetcher, RecordExtractor};
use crate::state::IngestionRun;
use crate::storage::Repository;
use crate::TrackerError;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

/// Everything one run needs: where to fetch, how, and where to merge
pub struct Pipeline {
    sources: Vec<SourceConfig>,
    fetcher: RateLimitedFetcher,
    repository: Arc<dyn Repository>,
}

impl Pipeline {
    pub fn new(
        sources: Vec<SourceConfig>,
        fetcher: RateLimitedFetcher,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            sources,
            fetcher,
            repository,
        }
    }

    /// Drives `run` to a terminal state and returns it
    ///
    /// A source that cannot be fetched counts as a page failure and the run
    /// moves on. A storage error ends the run as failed without touching
    /// further sources. Every counter change is published on `progress`.
    pub async fn execute(
        &self,
        mut run: IngestionRun,
        progress: &watch::Sender<IngestionRun>,
    ) -> IngestionRun {
        tracing::info!(
            run_id = run.id,
            trigger = run.trigger.to_db_string(),
            sources = self.sources.len(),
            spacing_ms = self.fetcher.spacing().as_millis() as u64,
            max_retries = self.fetcher.retry_policy().max_retries,
            "Ingestion run started"
        );

        for source in &self.sources {
            match self.ingest_source(source, &mut run, progress).await {
                Ok(()) => {}
                Err(TrackerError::Fetch(e)) => {
                    tracing::warn!(
                        run_id = run.id,
                        source = %source.name,
                        "Skipping source: {}",
                        e
                    );
                    run.record_page_failure();
                    progress.send_replace(run.clone());
                }
                Err(e) => {
                    tracing::error!(
                        run_id = run.id,
                        source = %source.name,
                        "Aborting run: {}",
                        e
                    );
                    if let Err(transition) = run.fail(e.to_string()) {
                        tracing::error!(run_id = run.id, "{}", transition);
                    }
                    return run;
                }
            }
        }

        if let Err(transition) = run.succeed() {
            tracing::error!(run_id = run.id, "{}", transition);
        }
        run
    }

    async fn ingest_source(
        &self,
        source: &SourceConfig,
        run: &mut IngestionRun,
        progress: &watch::Sender<IngestionRun>,
    ) -> crate::Result<()> {
        let base_url = Url::parse(&source.url).map_err(|e| FetchError::InvalidUrl {
            url: source.url.clone(),
            reason: e.to_string(),
        })?;

        let html = self.fetcher.fetch(&source.url).await?;
        let records = RecordExtractor::new(base_url, source.release_status).extract(&html);
        tracing::info!(
            run_id = run.id,
            source = %source.name,
            records = records.len(),
            "Extracted film records"
        );

        for record in &records {
            let outcome = self.repository.upsert(record)?;
            tracing::debug!(
                run_id = run.id,
                key = %record.identity_key(),
                outcome = outcome.label(),
                "Merged record"
            );
            run.record_outcome(&outcome);
            progress.send_replace(run.clone());
        }

        Ok(())
    }
}
