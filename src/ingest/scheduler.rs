//! Run admission and timed triggering
//!
//! The scheduler owns the single admission slot. Manual triggers, the
//! background timer, and foreground runs all pass through [`Scheduler::trigger`]
//! (or its awaiting twin), so at most one run is ever active.
//!
//! # Admission
//!
//! The check of `active` and the claim of the slot happen under one lock.
//! While a run executes, its live counters are readable through a watch
//! channel; on completion the finished run replaces `active` in `last_run`
//! under the same lock, so status readers see either the running snapshot
//! or the finished one, never both and never neither.

use crate::config::ScheduleConfig;
use crate::ingest::Pipeline;
use crate::state::{IngestionRun, SchedulerStatus, TriggerSource};
use crate::storage::Repository;
use crate::ConfigError;
use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Interval used when the schedule names neither an interval nor a time
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// When timed runs happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// A fixed gap after the previous run finished
    Interval(Duration),

    /// Every day at this UTC wall-clock time
    DailyAt(NaiveTime),
}

impl Cadence {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        if let Some(at) = &config.daily_at {
            return NaiveTime::parse_from_str(at.trim(), "%H:%M")
                .map(Self::DailyAt)
                .map_err(|_| {
                    ConfigError::Validation(format!(
                        "schedule.daily-at must be HH:MM (UTC), got '{}'",
                        at
                    ))
                });
        }

        match config.interval_hours {
            Some(0) => Err(ConfigError::Validation(
                "schedule.interval-hours must be at least 1".to_string(),
            )),
            Some(hours) => Ok(Self::Interval(Duration::from_secs(
                hours.saturating_mul(60 * 60),
            ))),
            None => Ok(Self::Interval(DEFAULT_INTERVAL)),
        }
    }

    /// The first scheduled instant strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Interval(gap) => chrono::Duration::from_std(*gap)
                .ok()
                .and_then(|gap| after.checked_add_signed(gap))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Self::DailyAt(time) => {
                let today = after.date_naive().and_time(*time).and_utc();
                if today > after {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(gap) => write!(f, "every {}h", gap.as_secs() / 3600),
            Self::DailyAt(time) => write!(f, "daily at {} UTC", time.format("%H:%M")),
        }
    }
}

/// Acknowledgment that a run was admitted and has started
#[derive(Debug, Clone, Serialize)]
pub struct RunAccepted {
    pub run_id: u64,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
}

/// Rejection: another run holds the admission slot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run {active_run_id} is already in progress")]
pub struct RunAlreadyActive {
    pub active_run_id: u64,
}

struct Slot {
    /// Live view of the running run; `Some` exactly while a run executes
    active: Option<watch::Receiver<IngestionRun>>,
    last_run: Option<IngestionRun>,
    next_scheduled_at: Option<DateTime<Utc>>,
    next_run_id: u64,
    timer_running: bool,
}

struct Inner {
    pipeline: Pipeline,
    cadence: Cadence,
    repository: Arc<dyn Repository>,
    slot: Mutex<Slot>,
    /// Bumped after every completed run
    completions: watch::Sender<u64>,
}

/// Handle to the process-wide scheduler; clones share one slot
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates the scheduler, restoring `last_run` and run numbering from
    /// the repository's run history
    pub fn new(pipeline: Pipeline, cadence: Cadence, repository: Arc<dyn Repository>) -> Self {
        let last_run = match repository.latest_run() {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!("Could not load run history: {}", e);
                None
            }
        };
        let next_run_id = last_run.as_ref().map_or(1, |run| run.id + 1);
        let (completions, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                pipeline,
                cadence,
                repository,
                slot: Mutex::new(Slot {
                    active: None,
                    last_run,
                    next_scheduled_at: None,
                    next_run_id,
                    timer_running: false,
                }),
                completions,
            }),
        }
    }

    /// Admits a run and starts it in the background
    ///
    /// Never blocks or queues: if a run is active this returns
    /// [`RunAlreadyActive`] immediately.
    pub fn trigger(&self, trigger: TriggerSource) -> Result<RunAccepted, RunAlreadyActive> {
        let (accepted, run, progress) = self.admit(trigger)?;
        tokio::spawn(Arc::clone(&self.inner).execute(run, progress));
        Ok(accepted)
    }

    /// Admits a run and waits for it to finish
    ///
    /// The run executes on its own task, so dropping the returned future
    /// stops the wait but not the run; the slot is released when it ends.
    pub async fn run_to_completion(
        &self,
        trigger: TriggerSource,
    ) -> Result<IngestionRun, RunAlreadyActive> {
        let (accepted, run, progress) = self.admit(trigger)?;
        let task = tokio::spawn(Arc::clone(&self.inner).execute(run, progress));

        match task.await {
            Ok(finished) => Ok(finished),
            Err(e) => {
                tracing::error!(run_id = accepted.run_id, "Run task ended abnormally: {}", e);
                Ok(panicked_run(accepted.run_id, trigger, accepted.started_at))
            }
        }
    }

    /// Point-in-time snapshot, safe to call while a run executes
    pub fn status(&self) -> SchedulerStatus {
        let slot = self.inner.lock_slot();
        SchedulerStatus {
            active_run: slot.active.as_ref().map(|live| live.borrow().clone()),
            last_run: slot.last_run.clone(),
            next_scheduled_at: slot.next_scheduled_at,
        }
    }

    /// Resolves once no run is active
    pub async fn wait_for_idle(&self) {
        let mut completions = self.inner.completions.subscribe();
        loop {
            if self.inner.lock_slot().active.is_none() {
                return;
            }
            if completions.changed().await.is_err() {
                return;
            }
        }
    }

    /// Starts the background timer loop
    ///
    /// The first tick is immediate when `run_on_startup` is set, otherwise
    /// one cadence from now. Each tick goes through [`Scheduler::trigger`];
    /// a tick that finds a run active is skipped and rescheduled. Dropping
    /// or shutting down the returned handle stops the loop but never
    /// cancels a run in flight.
    pub fn spawn_timer(&self, run_on_startup: bool) -> TimerHandle {
        let now = Utc::now();
        let first = if run_on_startup {
            now
        } else {
            self.inner.cadence.next_after(now)
        };
        {
            let mut slot = self.inner.lock_slot();
            slot.next_scheduled_at = Some(first);
            slot.timer_running = true;
        }
        tracing::info!(cadence = %self.inner.cadence, next = %first, "Scheduler timer started");

        let (shutdown, mut stop) = watch::channel(false);
        let scheduler = self.clone();
        let task = tokio::spawn(async move {
            let mut startup_tick = run_on_startup;
            loop {
                let deadline = scheduler.status().next_scheduled_at.unwrap_or_else(Utc::now);
                let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop.changed() => break,
                }

                // A run finishing while we slept moves the deadline
                let due = scheduler
                    .status()
                    .next_scheduled_at
                    .map_or(true, |next| next <= Utc::now());
                if !due {
                    continue;
                }

                let trigger = if startup_tick {
                    TriggerSource::Startup
                } else {
                    TriggerSource::Scheduled
                };
                startup_tick = false;

                let next = scheduler.inner.cadence.next_after(Utc::now());
                match scheduler.trigger(trigger) {
                    Ok(accepted) => {
                        tracing::info!(run_id = accepted.run_id, "Timed run admitted");
                    }
                    Err(active) => {
                        tracing::info!(
                            active_run_id = active.active_run_id,
                            next = %next,
                            "Timed trigger skipped, run already active"
                        );
                    }
                }
                scheduler.inner.set_next_scheduled(Some(next));
            }

            let mut slot = scheduler.inner.lock_slot();
            slot.timer_running = false;
            slot.next_scheduled_at = None;
            tracing::info!("Scheduler timer stopped");
        });

        TimerHandle { shutdown, task }
    }

    fn admit(
        &self,
        trigger: TriggerSource,
    ) -> Result<(RunAccepted, IngestionRun, watch::Sender<IngestionRun>), RunAlreadyActive> {
        let mut slot = self.inner.lock_slot();

        if let Some(live) = &slot.active {
            let active_run_id = live.borrow().id;
            tracing::info!(
                trigger = trigger.to_db_string(),
                active_run_id,
                "Trigger rejected, run already active"
            );
            return Err(RunAlreadyActive { active_run_id });
        }

        let run = IngestionRun::start(slot.next_run_id, trigger);
        slot.next_run_id += 1;
        let (progress, live) = watch::channel(run.clone());
        slot.active = Some(live);

        tracing::info!(run_id = run.id, trigger = trigger.to_db_string(), "Run admitted");
        let accepted = RunAccepted {
            run_id: run.id,
            trigger,
            started_at: run.started_at,
        };
        Ok((accepted, run, progress))
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_next_scheduled(&self, next: Option<DateTime<Utc>>) {
        let mut slot = self.lock_slot();
        if slot.timer_running {
            slot.next_scheduled_at = next;
        }
    }

    /// Runs the pipeline on its own task so a panic still releases the slot
    async fn execute(
        self: Arc<Self>,
        run: IngestionRun,
        progress: watch::Sender<IngestionRun>,
    ) -> IngestionRun {
        let (id, trigger, started_at) = (run.id, run.trigger, run.started_at);

        let worker = Arc::clone(&self);
        let result = tokio::spawn(async move { worker.pipeline.execute(run, &progress).await }).await;

        let finished = match result {
            Ok(finished) => finished,
            Err(e) => {
                tracing::error!(run_id = id, "Run task ended abnormally: {}", e);
                panicked_run(id, trigger, started_at)
            }
        };

        self.complete(&finished);
        finished
    }

    fn complete(&self, finished: &IngestionRun) {
        tracing::info!(
            run_id = finished.id,
            status = %finished.status,
            films_seen = finished.films_seen,
            films_created = finished.films_created,
            films_updated = finished.films_updated,
            pages_failed = finished.pages_failed,
            error = finished.error.as_deref().unwrap_or(""),
            "Ingestion run finished"
        );

        if let Err(e) = self.repository.record_run(finished) {
            tracing::warn!(run_id = finished.id, "Could not record run history: {}", e);
        }

        let next = self
            .cadence
            .next_after(finished.finished_at.unwrap_or_else(Utc::now));
        {
            let mut slot = self.lock_slot();
            slot.active = None;
            slot.last_run = Some(finished.clone());
            if slot.timer_running {
                slot.next_scheduled_at = Some(next);
            }
        }
        self.completions.send_modify(|count| *count += 1);
    }
}

/// Failed summary for a run whose task never returned one
fn panicked_run(id: u64, trigger: TriggerSource, started_at: DateTime<Utc>) -> IngestionRun {
    let mut failed = IngestionRun::start(id, trigger);
    failed.started_at = started_at;
    if let Err(transition) = failed.fail("run panicked") {
        tracing::error!(run_id = id, "{}", transition);
    }
    failed
}

/// Stops the timer loop started by [`Scheduler::spawn_timer`]
pub struct TimerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Signals the loop to stop and waits for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Scheduler timer task ended abnormally: {}", e);
        }
    }
}
