//! Jobs: one review revision under verification, one task per platform.

use buildbot_core::{Error, JobId, Platform, Result, TaskStatus, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::event::{JobContext, JobReport};
use crate::queue::{PlatformQueues, QueueEntry};
use crate::task::{Task, TaskInfo, TaskKey, TaskResult};

/// The review revision a job is created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub change_id: String,
    pub branch: String,
    pub git_ref: String,
    pub revision: String,
}

/// Completion state published by a job to its watchers.
#[derive(Debug, Clone)]
pub enum JobPhase {
    Active,
    Ready(Box<JobReport>),
    /// The project was stopped before the job finished.
    Aborted,
}

impl JobPhase {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobPhase::Active)
    }
}

/// Handle returned to whoever created a job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    serial: u64,
    phase: watch::Receiver<JobPhase>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.phase.borrow(), JobPhase::Ready(_))
    }

    pub fn report(&self) -> Option<JobReport> {
        match &*self.phase.borrow() {
            JobPhase::Ready(report) => Some((**report).clone()),
            _ => None,
        }
    }

    /// Wait until every task of the job is terminal.
    ///
    /// Returns `None` if the job was aborted instead.
    pub async fn wait(&mut self) -> Option<JobReport> {
        let phase = match self.phase.wait_for(JobPhase::is_finished).await {
            Ok(phase) => (*phase).clone(),
            Err(_) => return None,
        };
        match phase {
            JobPhase::Ready(report) => Some(*report),
            _ => None,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<JobPhase> {
        self.phase.clone()
    }
}

/// Outcome of an accepted worker result.
#[derive(Debug)]
pub(crate) struct Submission {
    pub result: TaskResult,
    /// Set when this result made the job ready.
    pub finished: Option<JobReport>,
}

#[derive(Debug)]
pub struct Job {
    serial: u64,
    id: JobId,
    project: String,
    change_id: String,
    branch: String,
    git_ref: String,
    revision: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    stale: bool,
    /// Live task per configured platform, in configuration order.
    tasks: Vec<Task>,
    /// Canceled attempts replaced by a retry.
    retired: Vec<Task>,
    results: Option<Vec<TaskResult>>,
    phase: watch::Sender<JobPhase>,
}

impl Job {
    /// Create the job, one pending task per platform, and enqueue the tasks.
    ///
    /// `id` must not be used by any other live job; see
    /// [`LiveJobIds`](crate::LiveJobIds).
    pub fn create(
        serial: u64,
        project: &str,
        id: JobId,
        request: JobRequest,
        platforms: &[Platform],
        queues: &mut PlatformQueues,
    ) -> Result<(Self, JobHandle)> {
        if platforms.is_empty() {
            return Err(Error::InvalidInput(format!(
                "project '{}' has no platforms to build on",
                project
            )));
        }
        if let Some(missing) = platforms.iter().find(|p| queues.get(**p).is_none()) {
            return Err(Error::Internal(format!(
                "project '{}' has no queue for platform {}",
                project, missing
            )));
        }

        let tasks: Vec<Task> = platforms
            .iter()
            .map(|platform| {
                Task::new(
                    id.clone(),
                    TaskKey {
                        job_serial: serial,
                        platform: *platform,
                        attempt: 0,
                    },
                )
            })
            .collect();

        for task in &tasks {
            queues.enqueue(QueueEntry {
                key: task.key(),
                job_id: id.clone(),
                branch: request.branch.clone(),
            });
        }

        let (phase, receiver) = watch::channel(JobPhase::Active);
        let handle = JobHandle {
            id: id.clone(),
            serial,
            phase: receiver,
        };

        info!(
            project = %project,
            job_id = %id,
            change = %request.change_id,
            branch = %request.branch,
            tasks = tasks.len(),
            "Created job"
        );

        let job = Self {
            serial,
            id,
            project: project.to_string(),
            change_id: request.change_id,
            branch: request.branch,
            git_ref: request.git_ref,
            revision: request.revision,
            started_at: Utc::now(),
            finished_at: None,
            stale: false,
            tasks,
            retired: Vec::new(),
            results: None,
            phase,
        };
        Ok((job, handle))
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_mut(&mut self, key: &TaskKey) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.key() == *key)
    }

    pub fn all_tasks_ready(&self) -> bool {
        self.tasks.iter().all(Task::is_ready)
    }

    /// Whether the aggregate result has been materialized.
    pub fn is_ready(&self) -> bool {
        self.results.is_some()
    }

    pub fn context(&self) -> JobContext {
        JobContext {
            project: self.project.clone(),
            job_id: self.id.clone(),
            change_id: self.change_id.clone(),
            branch: self.branch.clone(),
            git_ref: self.git_ref.clone(),
            revision: self.revision.clone(),
            stale: self.stale,
        }
    }

    /// The dispatched task holding `ticket`. Finished tasks no longer
    /// answer to their ticket.
    pub fn find_task_by_ticket(&self, ticket: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| holds_ticket(t, ticket))
    }

    /// The task currently being built by `worker_id`, if any.
    pub fn find_task_by_worker(&self, worker_id: &str) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| t.is_dispatched() && t.worker_id() == Some(worker_id))
    }

    /// Apply a worker result to the task owning `ticket`.
    ///
    /// A failure discards every sibling still waiting in a queue; a
    /// cancellation replaces the task with a fresh pending attempt.
    pub(crate) fn submit_result(
        &mut self,
        ticket: &str,
        worker_id: &str,
        log: Option<String>,
        status: TaskStatus,
        queues: &mut PlatformQueues,
    ) -> Option<Submission> {
        let index = self.tasks.iter().position(|t| holds_ticket(t, ticket))?;
        let mut result = self.tasks[index].complete(worker_id, log, status)?;

        if status.is_failed() {
            let discarded: Vec<Platform> = self
                .discard_pending(Some(index), queues)
                .iter()
                .map(|r| r.platform)
                .collect();
            if !discarded.is_empty() {
                info!(
                    job_id = %self.id,
                    platform = %result.platform,
                    ?discarded,
                    "Failure discarded queued sibling tasks"
                );
                if let Some(updated) = self.tasks[index].set_discarded_siblings(discarded) {
                    result = updated.clone();
                }
            }
        } else if status.is_canceled() && !self.stale {
            self.retry(index, queues);
        }

        let finished = self.materialize();
        Some(Submission { result, finished })
    }

    /// Mark the job as superseded by a newer revision.
    ///
    /// Queued tasks are discarded; dispatched ones keep running and their
    /// results are still recorded. Returns the discarded results and the
    /// job report if this made the job ready.
    pub(crate) fn mark_stale(
        &mut self,
        queues: &mut PlatformQueues,
    ) -> (Vec<TaskResult>, Option<JobReport>) {
        self.stale = true;
        let discarded = self.discard_pending(None, queues);
        info!(
            job_id = %self.id,
            discarded = discarded.len(),
            "Marked job stale"
        );
        (discarded, self.materialize())
    }

    /// Release watchers of a job that will never finish.
    pub(crate) fn abort(&mut self) {
        self.phase.send_if_modified(|phase| {
            if phase.is_finished() {
                return false;
            }
            *phase = JobPhase::Aborted;
            true
        });
    }

    fn discard_pending(
        &mut self,
        except: Option<usize>,
        queues: &mut PlatformQueues,
    ) -> Vec<TaskResult> {
        let mut discarded = Vec::new();
        for (index, task) in self.tasks.iter_mut().enumerate() {
            if Some(index) == except || !task.is_pending() {
                continue;
            }
            if !queues.remove(&task.key()) {
                debug!(task = %task.key(), "Discarded task was not queued");
            }
            discarded.push(task.discard());
        }
        discarded
    }

    fn retry(&mut self, index: usize, queues: &mut PlatformQueues) {
        let old = self.tasks[index].key();
        let key = TaskKey {
            attempt: old.attempt + 1,
            ..old
        };
        let replacement = Task::new(self.id.clone(), key);
        queues.enqueue(QueueEntry {
            key,
            job_id: self.id.clone(),
            branch: self.branch.clone(),
        });

        let retired = std::mem::replace(&mut self.tasks[index], replacement);
        self.retired.push(retired);
        info!(
            job_id = %self.id,
            platform = %key.platform,
            attempt = key.attempt,
            "Requeued canceled task"
        );
    }

    /// Build the aggregate result once every task is terminal.
    /// Later calls are no-ops.
    fn materialize(&mut self) -> Option<JobReport> {
        if self.results.is_some() || !self.all_tasks_ready() {
            return None;
        }

        self.results = Some(self.tasks.iter().filter_map(|t| t.result().cloned()).collect());
        self.finished_at = Some(Utc::now());

        let report = self.report()?;
        info!(
            job_id = %self.id,
            verdict = %report.verdict,
            stale = self.stale,
            "Job finished"
        );
        self.phase
            .send_replace(JobPhase::Ready(Box::new(report.clone())));
        Some(report)
    }

    pub fn verdict(&self) -> Option<Verdict> {
        let results = self.results.as_ref()?;
        Some(Verdict::from_statuses(results.iter().map(|r| r.status)))
    }

    /// The aggregate report, once the job is ready.
    pub fn report(&self) -> Option<JobReport> {
        let results = self.results.as_ref()?;
        Some(JobReport {
            job: self.context(),
            verdict: Verdict::from_statuses(results.iter().map(|r| r.status)),
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or_else(Utc::now),
            results: results.clone(),
            retired: self
                .retired
                .iter()
                .filter_map(|t| t.result().cloned())
                .collect(),
        })
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            project: self.project.clone(),
            change_id: self.change_id.clone(),
            branch: self.branch.clone(),
            git_ref: self.git_ref.clone(),
            revision: self.revision.clone(),
            started_at: self.started_at,
            stale: self.stale,
            ready: self.is_ready(),
            verdict: self.verdict(),
            tasks: self.tasks.iter().map(Task::info).collect(),
        }
    }
}

fn holds_ticket(task: &Task, ticket: &str) -> bool {
    task.is_dispatched() && task.ticket().is_some_and(|t| t.as_str() == ticket)
}

/// Read-only snapshot of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub project: String,
    pub change_id: String,
    pub branch: String,
    pub git_ref: String,
    pub revision: String,
    pub started_at: DateTime<Utc>,
    pub stale: bool,
    pub ready: bool,
    pub verdict: Option<Verdict>,
    pub tasks: Vec<TaskInfo>,
}

impl JobInfo {
    pub fn task(&self, platform: Platform) -> Option<&TaskInfo> {
        self.tasks.iter().find(|t| t.platform == platform)
    }
}
