//! Statistics generation from the catalog database
//!
//! This module provides functionality for extracting and displaying
//! catalog statistics from the storage layer.

use crate::film::ReleaseStatus;
use crate::state::IngestionRun;
use crate::storage::Repository;
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;

/// Window for "recent releases"
pub const RECENT_RELEASE_DAYS: u64 = 30;

/// Catalog statistics summary
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatistics {
    pub total_films: u64,
    pub released: u64,
    pub upcoming: u64,

    /// Released films dated within the last 30 days
    pub recent_releases: u64,

    /// Newest recorded run, if any
    pub latest_run: Option<IngestionRun>,
}

/// Loads statistics from storage as of today (UTC)
pub fn load_statistics(repository: &dyn Repository) -> crate::Result<CatalogStatistics> {
    load_statistics_on(repository, Utc::now().date_naive())
}

/// Loads statistics with `today` as the reference date
pub fn load_statistics_on(
    repository: &dyn Repository,
    today: NaiveDate,
) -> crate::Result<CatalogStatistics> {
    let since = today
        .checked_sub_days(Days::new(RECENT_RELEASE_DAYS))
        .unwrap_or(NaiveDate::MIN);

    Ok(CatalogStatistics {
        total_films: repository.count()?,
        released: repository.count_by_status(ReleaseStatus::Released)?,
        upcoming: repository.count_by_status(ReleaseStatus::Upcoming)?,
        recent_releases: repository.count_released_since(since)?,
        latest_run: repository.latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Total films: {}", stats.total_films);
    println!("  Released: {}", stats.released);
    println!("  Upcoming: {}", stats.upcoming);
    println!(
        "  Released in the last {} days: {}",
        RECENT_RELEASE_DAYS, stats.recent_releases
    );
    println!();

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run (#{}):", run.id);
            println!("  Trigger: {}", run.trigger.to_db_string());
            println!("  Status: {}", run.status);
            println!("  Started: {}", run.started_at.to_rfc3339());
            if let Some(duration) = run.duration() {
                println!("  Duration: {}s", duration.num_seconds());
            }
            println!(
                "  Films: {} seen, {} created, {} updated",
                run.films_seen, run.films_created, run.films_updated
            );
            println!("  Pages failed: {}", run.pages_failed);
            if let Some(error) = &run.error {
                println!("  Error: {}", error);
            }
        }
        None => println!("No ingestion runs recorded yet."),
    }
}
