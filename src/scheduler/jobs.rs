//! Due-job polling
//!
//! Jobs (typically backups) are defined and stored outside the core. The
//! janitor only reads them, hands each due one to a [`JobRunner`] and
//! advances its schedule.

use super::supervisor::Janitor;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How often a job repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    /// Fixed 30 days
    Monthly,
    /// Every n seconds
    Every(u64),
    /// Runs only when triggered externally
    Manual,
}

impl Cadence {
    /// Next due time after a run at `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Daily => Some(now + chrono::Duration::days(1)),
            Cadence::Weekly => Some(now + chrono::Duration::days(7)),
            Cadence::Monthly => Some(now + chrono::Duration::days(30)),
            Cadence::Every(seconds) => {
                let seconds = i64::try_from(*seconds).ok()?;
                Some(now + chrono::Duration::seconds(seconds))
            }
            Cadence::Manual => None,
        }
    }
}

/// Snapshot of a job as stored externally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub connection_id: String,
    pub name: String,
    pub enabled: bool,
    pub cadence: Cadence,
    pub next_due: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(
        id: impl Into<String>,
        connection_id: impl Into<String>,
        name: impl Into<String>,
        cadence: Cadence,
        next_due: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            connection_id: connection_id.into(),
            name: name.into(),
            enabled: true,
            cadence,
            next_due,
            last_run: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_due.map(|due| due <= now).unwrap_or(false)
    }
}

/// External store of job definitions
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ScheduledJob>>;

    /// Record a run and the job's next due time
    async fn mark_run(
        &self,
        job_id: &str,
        last_run: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Executes one job (e.g. a backup)
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &ScheduledJob) -> Result<()>;
}

/// Job definitions kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, job: ScheduledJob) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(job.id.clone(), job);
        }
    }

    pub fn get(&self, job_id: &str) -> Option<ScheduledJob> {
        self.jobs.lock().ok()?.get(job_id).cloned()
    }

    pub fn remove(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .map(|mut jobs| jobs.remove(job_id).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list(&self) -> Result<Vec<ScheduledJob>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| Error::internal("Job store lock poisoned"))?;
        let mut list: Vec<ScheduledJob> = jobs.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn mark_run(
        &self,
        job_id: &str,
        last_run: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| Error::internal("Job store lock poisoned"))?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::storage(format!("Unknown job '{}'", job_id)))?;
        job.last_run = Some(last_run);
        job.next_due = next_due;
        Ok(())
    }
}

/// Poll interval bounds for the job janitor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobIntervals {
    /// Used while any job is due
    pub base: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Used when no enabled job has a due time
    pub idle: Duration,
}

impl From<&SchedulerConfig> for JobIntervals {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            base: Duration::from_secs(config.job_base_interval_seconds),
            min: Duration::from_secs(config.job_min_interval_seconds),
            max: Duration::from_secs(config.job_max_interval_seconds),
            idle: Duration::from_secs(config.job_idle_interval_seconds),
        }
    }
}

/// Next poll interval for a set of jobs.
///
/// `base` if anything is due, otherwise half the time to the soonest due
/// job clamped to `[min, max]`, or `idle` when nothing is scheduled.
pub fn poll_interval(jobs: &[ScheduledJob], now: DateTime<Utc>, intervals: &JobIntervals) -> Duration {
    let soonest = jobs
        .iter()
        .filter(|job| job.enabled)
        .filter_map(|job| job.next_due)
        .min();

    match soonest {
        None => intervals.idle,
        Some(due) if due <= now => intervals.base,
        Some(due) => {
            let until = (due - now).to_std().unwrap_or_default();
            (until / 2).clamp(intervals.min, intervals.max)
        }
    }
}

/// Runs due jobs and advances their schedules
pub struct JobJanitor {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    intervals: JobIntervals,
    backoff: Duration,
}

impl JobJanitor {
    pub fn new(store: Arc<dyn JobStore>, runner: Arc<dyn JobRunner>, config: &SchedulerConfig) -> Self {
        Self {
            store,
            runner,
            intervals: JobIntervals::from(config),
            backoff: Duration::from_secs(config.job_error_backoff_seconds),
        }
    }

    async fn run_job(&self, job: &ScheduledJob) -> bool {
        log::info!("Running scheduled job '{}' for '{}'", job.name, job.connection_id);
        match AssertUnwindSafe(self.runner.run(job)).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("Scheduled job '{}' failed: {}", job.name, e);
                false
            }
            Err(_) => {
                log::error!("Scheduled job '{}' panicked", job.name);
                false
            }
        }
    }
}

#[async_trait]
impl Janitor for JobJanitor {
    fn name(&self) -> &str {
        "job_scheduler"
    }

    async fn initial_interval(&self) -> Duration {
        self.intervals.base
    }

    /// Each due job is advanced exactly once, even when its runner fails,
    /// so a broken job is not retried on every tick.
    async fn run_once(&self) -> Result<usize> {
        let now = Utc::now();
        let due: Vec<ScheduledJob> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();

        let mut succeeded = 0;
        for job in &due {
            if self.run_job(job).await {
                succeeded += 1;
            }
            let next_due = job.cadence.next_after(now);
            self.store.mark_run(&job.id, now, next_due).await?;
        }

        if !due.is_empty() {
            log::info!("Ran {} due jobs ({} succeeded)", due.len(), succeeded);
        }
        Ok(due.len())
    }

    async fn next_interval(&self) -> Result<Duration> {
        let jobs = self.store.list().await?;
        Ok(poll_interval(&jobs, Utc::now(), &self.intervals))
    }

    fn backoff_interval(&self) -> Duration {
        self.backoff
    }
}
