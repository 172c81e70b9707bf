//! Maintenance scheduler
//!
//! Holds named jobs with explicit next-run timestamps. Every tick starts
//! the jobs that are due on their own tasks, so a long monthly run never
//! delays the shorter cadences. A job that is still running when it comes
//! due again is skipped for that occurrence.

pub mod cadence;
pub mod job;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::config::SchedulerConfig;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use cadence::Cadence;
pub use job::{JobStatus, MaintenanceJob, MaintenanceRoutine};

use crate::error::MaintenanceError;
use crate::metrics::MaintenanceMetrics;

struct ScheduledJob {
    state: Mutex<MaintenanceJob>,
    routine: Arc<dyn MaintenanceRoutine>,
}

impl ScheduledJob {
    fn state(&self) -> MutexGuard<'_, MaintenanceJob> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A job run started by [`MaintenanceScheduler::tick`].
pub struct JobHandle {
    pub name: String,
    pub handle: JoinHandle<JobStatus>,
}

pub struct MaintenanceScheduler {
    jobs: Vec<Arc<ScheduledJob>>,
    tz: Tz,
    tick_interval: Duration,
    metrics: MaintenanceMetrics,
}

impl MaintenanceScheduler {
    pub fn new(
        config: &SchedulerConfig,
        metrics: MaintenanceMetrics,
    ) -> Result<Self, MaintenanceError> {
        let tz = config
            .timezone
            .parse::<Tz>()
            .map_err(|e| MaintenanceError::InvalidTimezone {
                timezone: config.timezone.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            jobs: Vec::new(),
            tz,
            tick_interval: config.tick_interval,
            metrics,
        })
    }

    /// Register a job whose first run is the cadence's next occurrence
    /// after `now`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        cadence: Cadence,
        routine: Arc<dyn MaintenanceRoutine>,
        now: DateTime<Utc>,
    ) -> Result<(), MaintenanceError> {
        cadence.validate()?;
        let job = MaintenanceJob::new(name, cadence, cadence.next_after(now, &self.tz));
        info!(
            job = %job.name,
            cadence = %job.cadence,
            next_run = %job.next_run,
            "Registered maintenance job"
        );
        self.jobs.push(Arc::new(ScheduledJob {
            state: Mutex::new(job),
            routine,
        }));
        Ok(())
    }

    /// Snapshot of every job in registration order.
    pub fn jobs(&self) -> Vec<MaintenanceJob> {
        self.jobs.iter().map(|job| job.state().clone()).collect()
    }

    pub fn job(&self, name: &str) -> Option<MaintenanceJob> {
        self.jobs
            .iter()
            .map(|job| job.state().clone())
            .find(|job| job.name == name)
    }

    /// Start every job due at `now`.
    ///
    /// `next_run` of a due job always advances. The due check and the
    /// transition to Running happen under the job's lock, so one
    /// occurrence can never start two runs.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JobHandle> {
        let mut started = Vec::new();

        for scheduled in &self.jobs {
            let name = {
                let mut job = scheduled.state();
                if !job.is_due(now) {
                    continue;
                }
                job.next_run = job.cadence.next_after(now, &self.tz);

                if job.status.is_running() {
                    self.metrics.record_job_skipped();
                    warn!(
                        job = %job.name,
                        next_run = %job.next_run,
                        "Previous run still in progress, skipping occurrence"
                    );
                    continue;
                }

                job.start(now);
                job.name.clone()
            };

            let run_id = Uuid::new_v4();
            self.metrics.record_job_started();
            info!(job = %name, run_id = %run_id, "Starting maintenance job");

            let scheduled = scheduled.clone();
            let metrics = self.metrics.clone();
            let job_name = name.clone();
            let handle = tokio::spawn(async move {
                let started_at = std::time::Instant::now();
                let outcome = AssertUnwindSafe(scheduled.routine.run())
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("routine panicked".to_string()),
                };

                let duration_ms = started_at.elapsed().as_millis() as u64;
                match &result {
                    Ok(()) => {
                        metrics.record_job_succeeded();
                        info!(job = %job_name, run_id = %run_id, duration_ms, "Maintenance job completed");
                    }
                    Err(message) => {
                        metrics.record_job_failed();
                        error!(
                            job = %job_name,
                            run_id = %run_id,
                            duration_ms,
                            error = %message,
                            "Maintenance job failed"
                        );
                    }
                }

                let mut job = scheduled.state();
                job.finish(result);
                job.status
            });

            started.push(JobHandle { name, handle });
        }

        started
    }

    /// Drive [`Self::tick`] on the configured interval until aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let tick_interval = self.tick_interval;
        info!(
            jobs = self.jobs.len(),
            tick_interval = ?tick_interval,
            timezone = %self.tz,
            "Starting maintenance scheduler"
        );

        tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let started = self.tick(Utc::now());
                if !started.is_empty() {
                    debug!(started = started.len(), "Scheduler tick dispatched jobs");
                }
            }
        })
    }
}
