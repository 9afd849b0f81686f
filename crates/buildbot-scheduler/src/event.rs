//! Notifications for the review-posting side.
//!
//! Every event carries enough job context to render a review comment
//! without reaching back into the scheduler.

use buildbot_core::{JobId, Platform, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskResult;

/// The review revision a job verifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub project: String,
    pub job_id: JobId,
    pub change_id: String,
    pub branch: String,
    pub git_ref: String,
    pub revision: String,
    pub stale: bool,
}

/// A worker claimed a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStarted {
    pub job: JobContext,
    pub platform: Platform,
    pub ticket: String,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
}

/// A worker result was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub job: JobContext,
    pub result: TaskResult,
}

/// Every task of a job is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job: JobContext,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Final result per platform, in configuration order.
    pub results: Vec<TaskResult>,
    /// Canceled attempts that were replaced by a retry.
    pub retired: Vec<TaskResult>,
}

impl JobReport {
    /// Platforms whose results decided the verdict.
    pub fn counted(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| r.status.counts_toward_verdict())
    }

    /// Whether the verdict should be posted as a vote. Stale jobs only
    /// produce an informational report.
    pub fn is_authoritative(&self) -> bool {
        !self.job.stale
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskStarted(TaskStarted),
    TaskFinished(TaskReport),
    JobFinished(JobReport),
}

impl SchedulerEvent {
    pub fn job(&self) -> &JobContext {
        match self {
            SchedulerEvent::TaskStarted(e) => &e.job,
            SchedulerEvent::TaskFinished(e) => &e.job,
            SchedulerEvent::JobFinished(e) => &e.job,
        }
    }
}
