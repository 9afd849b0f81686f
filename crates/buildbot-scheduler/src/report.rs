//! Plain-text renderings of reports and queue state.
//!
//! Task and job reports are what ends up as review comments; the queue
//! report is the operator's view of a project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::{JobReport, TaskReport};
use crate::job::JobInfo;
use crate::queue::QueueDump;
use crate::task::{TaskInfo, TaskResult};

const RULE: &str =
    "------------------------------------------------------------------------------";

fn time(at: DateTime<Utc>) -> String {
    at.format("%b-%d %H:%M").to_string()
}

fn write_result(f: &mut fmt::Formatter<'_>, result: &TaskResult) -> fmt::Result {
    write!(
        f,
        "{} {} ({})",
        result.platform.as_str().to_uppercase(),
        result.status.as_str().to_uppercase(),
        result.decorated_id
    )
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = &self.result;
        write_result(f, result)?;
        write!(
            f,
            "\n\nBuild on {} at {}: {}",
            result.worker_id.as_deref().unwrap_or("-"),
            time(result.ended_at),
            result.log.as_deref().unwrap_or_default()
        )
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_authoritative() {
            f.write_str("[informational, newer patch set exists] ")?;
        }
        write!(f, "Build {}: {}", self.verdict, self.job.job_id)?;
        for result in &self.results {
            f.write_str("\n  ")?;
            write_result(f, result)?;
            if let Some(log) = &result.log {
                write!(f, " {}", log)?;
            }
        }
        Ok(())
    }
}

/// Jobs and queues of one project at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueReport {
    pub project: String,
    pub jobs: Vec<JobInfo>,
    pub queues: QueueDump,
}

impl QueueReport {
    /// Live tasks across every job.
    pub fn task_count(&self) -> usize {
        self.jobs.iter().map(|j| j.tasks.len()).sum()
    }
}

fn write_row(
    f: &mut fmt::Formatter<'_>,
    id: &str,
    when: &str,
    state: &str,
    git_ref: &str,
    bot: &str,
    branch: &str,
) -> fmt::Result {
    writeln!(
        f,
        "{:<17} {:<12} {:<12} {:<22} {:<3} {}",
        id, when, state, git_ref, bot, branch
    )
}

fn write_task(f: &mut fmt::Formatter<'_>, job: &JobInfo, task: &TaskInfo) -> fmt::Result {
    let id = task
        .ticket
        .clone()
        .unwrap_or_else(|| format!("{}_{}", task.job_id, task.platform));
    let when = match (task.ended_at, task.started_at) {
        (Some(at), _) | (None, Some(at)) => time(at),
        (None, None) => "-".to_string(),
    };
    let state = match (&task.status, task.state.as_str()) {
        (Some(status), "completed") => status.as_str().to_uppercase(),
        (_, state) => state.to_uppercase(),
    };
    write_row(
        f,
        &id,
        &when,
        &format!("Job: {}", state),
        &job.git_ref,
        task.worker_id.as_deref().unwrap_or("-"),
        &job.branch,
    )
}

impl fmt::Display for QueueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        write_row(f, "Task-Id", "Start/End", "Type/State", "Ref", "Bot", "Branch")?;
        for job in &self.jobs {
            let state = if job.stale { "Stale" } else { "Change" };
            write_row(
                f,
                job.id.as_str(),
                &time(job.started_at),
                state,
                &job.git_ref,
                "-",
                &job.branch,
            )?;
            for task in &job.tasks {
                write_task(f, job, task)?;
            }
        }
        writeln!(f, "{}", RULE)?;
        writeln!(f, "  {} task(s)", self.task_count())?;

        writeln!(f, "Queues of {}", self.project)?;
        writeln!(f, "{}", RULE)?;
        for (platform, entries) in &self.queues.queues {
            writeln!(f, "Queue for platform: {}", platform)?;
            for entry in entries {
                writeln!(f, "  {} {}", entry.key, entry.branch)?;
            }
        }
        writeln!(f, "{}", RULE)?;
        writeln!(f, "  {} task(s)", self.queues.pending())
    }
}
