use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cadence::Cadence;
use crate::error::MaintenanceError;

/// Work bound to a scheduled job.
#[async_trait]
pub trait MaintenanceRoutine: Send + Sync {
    async fn run(&self) -> Result<(), MaintenanceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_running(self) -> bool {
        self == JobStatus::Running
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "IDLE"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// State of one named job, as reported by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceJob {
    pub name: String,
    pub cadence: Cadence,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub run_count: u64,
}

impl MaintenanceJob {
    pub fn new(name: impl Into<String>, cadence: Cadence, next_run: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            cadence,
            last_run: None,
            next_run,
            status: JobStatus::Idle,
            last_error: None,
            run_count: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run
    }

    /// Idle/Completed/Failed -> Running.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.last_run = Some(now);
        self.run_count += 1;
    }

    /// Running -> Completed/Failed.
    pub(crate) fn finish(&mut self, result: Result<(), String>) {
        match result {
            Ok(()) => {
                self.status = JobStatus::Completed;
                self.last_error = None;
            }
            Err(message) => {
                self.status = JobStatus::Failed;
                self.last_error = Some(message);
            }
        }
    }
}
