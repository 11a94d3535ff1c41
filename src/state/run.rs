/// Ingestion run state and summary
///
/// A run moves `Running -> Succeeded` or `Running -> Failed` exactly once.
/// Once `finished_at` is set the summary is never modified again.
use crate::film::MergeOutcome;
use crate::TrackerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Current state of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Sources are still being fetched and merged
    Running,

    /// Every source was attempted; page failures may still have occurred
    Succeeded,

    /// A storage failure aborted the run
    Failed,
}

impl RunStatus {
    /// Checks if transitioning from this state to another is allowed
    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        matches!(
            (self, target),
            (Self::Running, Self::Succeeded) | (Self::Running, Self::Failed)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// What caused a run to be admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// API caller
    Manual,
    /// Background timer
    Scheduled,
    /// `run-on-startup`
    Startup,
    /// Foreground `--once` invocation
    Cli,
}

impl TriggerSource {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Startup => "startup",
            Self::Cli => "cli",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            "startup" => Some(Self::Startup),
            "cli" => Some(Self::Cli),
            _ => None,
        }
    }
}

/// One execution of the fetch, extract, merge pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionRun {
    pub id: u64,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub films_seen: u64,
    pub films_created: u64,
    pub films_updated: u64,
    /// Source pages that errored without aborting the run
    pub pages_failed: u64,
    /// Cause of a `Failed` run
    pub error: Option<String>,
}

impl IngestionRun {
    /// Creates a run in the `Running` state, started now
    pub fn start(id: u64, trigger: TriggerSource) -> Self {
        Self {
            id,
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            films_seen: 0,
            films_created: 0,
            films_updated: 0,
            pages_failed: 0,
            error: None,
        }
    }

    /// Counts one merged record; unchanged merges only count as seen
    pub fn record_outcome(&mut self, outcome: &MergeOutcome) {
        self.films_seen += 1;
        match outcome {
            MergeOutcome::Created => self.films_created += 1,
            MergeOutcome::Updated { .. } => self.films_updated += 1,
            MergeOutcome::Unchanged => {}
        }
    }

    pub fn record_page_failure(&mut self) {
        self.pages_failed += 1;
    }

    /// Finishes the run successfully
    pub fn succeed(&mut self) -> Result<(), TrackerError> {
        self.transition(RunStatus::Succeeded)
    }

    /// Finishes the run as failed with a human-readable cause
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TrackerError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, to: RunStatus) -> Result<(), TrackerError> {
        if !self.status.can_transition_to(to) {
            return Err(TrackerError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Elapsed time for a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|finished| finished - self.started_at)
    }
}
