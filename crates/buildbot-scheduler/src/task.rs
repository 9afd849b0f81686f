//! Platform tasks: one build attempt of one job on one platform.

use buildbot_core::{Error, JobId, Platform, Result, TaskStatus, Ticket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a task inside one project scheduler.
///
/// `job_serial` tells apart jobs that share an abbreviated revision, and
/// `attempt` tells apart a canceled task from its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub job_serial: u64,
    pub platform: Platform,
    pub attempt: u32,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}/{}/{}", self.job_serial, self.platform, self.attempt)
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub job_id: JobId,
    pub platform: Platform,
    pub attempt: u32,
    /// Ticket string for built tasks, job id for discarded ones.
    pub decorated_id: String,
    pub status: TaskStatus,
    /// Log reference supplied by the worker.
    pub log: Option<String>,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    /// Sibling platforms dropped from their queues because this task failed.
    pub discarded_siblings: Vec<Platform>,
}

/// Lifecycle of a task.
#[derive(Debug, Clone)]
pub enum TaskState {
    Pending,
    Dispatched {
        ticket: Ticket,
        worker_id: String,
        started_at: DateTime<Utc>,
    },
    Completed {
        ticket: Ticket,
        result: TaskResult,
    },
    Discarded {
        result: TaskResult,
    },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed { .. } | TaskState::Discarded { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Dispatched { .. } => "dispatched",
            TaskState::Completed { .. } => "completed",
            TaskState::Discarded { .. } => "discarded",
        }
    }
}

/// A single platform build attempt, owned by its job.
#[derive(Debug, Clone)]
pub struct Task {
    job_id: JobId,
    key: TaskKey,
    state: TaskState,
}

impl Task {
    pub fn new(job_id: JobId, key: TaskKey) -> Self {
        Self {
            job_id,
            key,
            state: TaskState::Pending,
        }
    }

    pub fn key(&self) -> TaskKey {
        self.key
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn platform(&self) -> Platform {
        self.key.platform
    }

    pub fn attempt(&self) -> u32 {
        self.key.attempt
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, TaskState::Pending)
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self.state, TaskState::Dispatched { .. })
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match &self.state {
            TaskState::Dispatched { ticket, .. } | TaskState::Completed { ticket, .. } => {
                Some(ticket)
            }
            _ => None,
        }
    }

    pub fn worker_id(&self) -> Option<&str> {
        match &self.state {
            TaskState::Dispatched { worker_id, .. } => Some(worker_id.as_str()),
            TaskState::Completed { result, .. } => result.worker_id.as_deref(),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match &self.state {
            TaskState::Completed { result, .. } | TaskState::Discarded { result } => Some(result),
            _ => None,
        }
    }

    /// Bind the task to a worker.
    ///
    /// Only a pending task can be dispatched; the scheduler removes the task
    /// from its queue first, so a second dispatch means a caller bug.
    pub fn dispatch(&mut self, worker_id: &str) -> Result<Ticket> {
        if !self.is_pending() {
            return Err(Error::InvalidTransition(format!(
                "task {} is {}, not pending",
                self.key,
                self.state.name()
            )));
        }

        let ticket = Ticket::new(self.job_id.clone(), self.key.platform, self.key.attempt);
        self.state = TaskState::Dispatched {
            ticket: ticket.clone(),
            worker_id: worker_id.to_string(),
            started_at: ticket.created_at(),
        };
        Ok(ticket)
    }

    /// The ticket a dispatch would hand out, without claiming the task.
    pub fn preview_ticket(&self) -> Ticket {
        Ticket::new(self.job_id.clone(), self.key.platform, self.key.attempt)
    }

    /// Record a worker result.
    ///
    /// Returns `None` when the task is not dispatched or was dispatched to
    /// a different worker.
    pub fn complete(
        &mut self,
        worker_id: &str,
        log: Option<String>,
        status: TaskStatus,
    ) -> Option<TaskResult> {
        let (ticket, started_at) = match &self.state {
            TaskState::Dispatched {
                ticket,
                worker_id: bound,
                started_at,
            } if bound == worker_id => (ticket.clone(), *started_at),
            _ => return None,
        };

        let result = TaskResult {
            job_id: self.job_id.clone(),
            platform: self.key.platform,
            attempt: self.key.attempt,
            decorated_id: ticket.to_string(),
            status,
            log,
            worker_id: Some(worker_id.to_string()),
            started_at: Some(started_at),
            ended_at: Utc::now(),
            discarded_siblings: Vec::new(),
        };
        self.state = TaskState::Completed {
            ticket,
            result: result.clone(),
        };
        Some(result)
    }

    /// Drop the task without building it.
    ///
    /// Already terminal tasks keep their result.
    pub fn discard(&mut self) -> TaskResult {
        if let Some(result) = self.result() {
            return result.clone();
        }

        let (worker_id, started_at) = match &self.state {
            TaskState::Dispatched {
                worker_id,
                started_at,
                ..
            } => (Some(worker_id.clone()), Some(*started_at)),
            _ => (None, None),
        };
        let result = TaskResult {
            job_id: self.job_id.clone(),
            platform: self.key.platform,
            attempt: self.key.attempt,
            decorated_id: self.job_id.to_string(),
            status: TaskStatus::Discarded,
            log: None,
            worker_id,
            started_at,
            ended_at: Utc::now(),
            discarded_siblings: Vec::new(),
        };
        self.state = TaskState::Discarded {
            result: result.clone(),
        };
        result
    }

    pub(crate) fn set_discarded_siblings(&mut self, siblings: Vec<Platform>) -> Option<&TaskResult> {
        match &mut self.state {
            TaskState::Completed { result, .. } => {
                result.discarded_siblings = siblings;
                Some(result)
            }
            _ => None,
        }
    }

    pub fn info(&self) -> TaskInfo {
        let (started_at, ended_at, status) = match &self.state {
            TaskState::Pending => (None, None, None),
            TaskState::Dispatched { started_at, .. } => (Some(*started_at), None, None),
            TaskState::Completed { result, .. } | TaskState::Discarded { result } => {
                (result.started_at, Some(result.ended_at), Some(result.status))
            }
        };
        TaskInfo {
            job_id: self.job_id.clone(),
            platform: self.key.platform,
            attempt: self.key.attempt,
            state: self.state.name().to_string(),
            ticket: self.ticket().map(|t| t.to_string()),
            worker_id: self.worker_id().map(str::to_string),
            started_at,
            ended_at,
            status,
        }
    }
}

/// Read-only snapshot of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub job_id: JobId,
    pub platform: Platform,
    pub attempt: u32,
    pub state: String,
    pub ticket: Option<String>,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
}
