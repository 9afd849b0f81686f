//! Task status and the combined job verdict.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// Outcome of one platform build, as reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
    /// The worker gave up on the build; the platform gets another attempt.
    Canceled,
    /// The build was never run because its job no longer needed it.
    Discarded,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Failed)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskStatus::Canceled)
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, TaskStatus::Discarded)
    }

    /// Whether this status takes part in the combined pass/fail verdict.
    pub fn counts_toward_verdict(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Discarded => "discarded",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
            "discarded" => Ok(TaskStatus::Discarded),
            other => Err(Error::InvalidInput(format!("unknown task status: {}", other))),
        }
    }
}

/// Combined result of all platform builds of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
    /// Nothing that counts was built, e.g. every task was discarded.
    Inconclusive,
}

impl Verdict {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut verdict = Verdict::Inconclusive;
        for status in statuses.into_iter().filter(|s| s.counts_toward_verdict()) {
            if status.is_failed() {
                return Verdict::Failure;
            }
            verdict = Verdict::Success;
        }
        verdict
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Success => "success",
            Verdict::Failure => "failure",
            Verdict::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}
