//! Per-project scheduler: the single lock around a project's jobs and queues.

use buildbot_core::{Error, JobId, Platform, Result, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::event::{SchedulerEvent, TaskReport, TaskStarted};
use crate::ids::LiveJobIds;
use crate::job::{Job, JobHandle, JobInfo, JobPhase, JobRequest};
use crate::queue::{PlatformQueues, QueueDump};
use crate::report::QueueReport;
use crate::task::TaskResult;

/// What a worker receives when it pulls work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub ticket: String,
    pub job_id: JobId,
    pub platform: Platform,
    pub branch: String,
    pub git_ref: String,
    /// Set for previews that did not claim the task.
    pub test_only: bool,
}

#[derive(Debug, Default)]
struct ProjectState {
    running: bool,
    next_serial: u64,
    jobs: Vec<Job>,
    queues: PlatformQueues,
}

/// Owns the job registry and the platform queues of one project.
///
/// Every operation takes the project lock, so dispatches, result
/// submissions and stale handling never interleave.
pub struct ProjectScheduler {
    name: String,
    platforms: Vec<Platform>,
    state: Arc<Mutex<ProjectState>>,
    events: broadcast::Sender<SchedulerEvent>,
    job_ids: LiveJobIds,
}

impl ProjectScheduler {
    pub fn new(
        name: impl Into<String>,
        platforms: &[Platform],
        events: broadcast::Sender<SchedulerEvent>,
    ) -> Result<Self> {
        Self::with_job_ids(name, platforms, events, LiveJobIds::new())
    }

    /// Like [`new`](Self::new), drawing job ids from a set shared with
    /// other projects.
    pub fn with_job_ids(
        name: impl Into<String>,
        platforms: &[Platform],
        events: broadcast::Sender<SchedulerEvent>,
        job_ids: LiveJobIds,
    ) -> Result<Self> {
        let name = name.into();
        let mut unique: Vec<Platform> = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if !unique.contains(platform) {
                unique.push(*platform);
            }
        }
        if unique.is_empty() {
            return Err(Error::InvalidInput(format!(
                "project '{}' has no platforms configured",
                name
            )));
        }

        Ok(Self {
            name,
            platforms: unique,
            state: Arc::new(Mutex::new(ProjectState::default())),
            events,
            job_ids,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Create the platform queues and accept work.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.running {
            return;
        }
        state.queues = PlatformQueues::new(&self.platforms);
        state.running = true;
        info!(project = %self.name, platforms = ?self.platforms, "Started project scheduler");
    }

    /// Abort every live job and drop all queues.
    ///
    /// Workers reporting afterwards find no ticket and are ignored.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        for job in state.jobs.iter_mut() {
            job.abort();
            self.job_ids.release(job.id());
        }
        let dropped = state.jobs.len();
        state.jobs.clear();
        state.queues.clear();
        state.running = false;
        info!(project = %self.name, dropped_jobs = dropped, "Stopped project scheduler");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Register a job for a review revision and queue one task per platform.
    ///
    /// The caller is expected to have checked [`find_job_by_revision`]
    /// first; this does not deduplicate.
    ///
    /// [`find_job_by_revision`]: Self::find_job_by_revision
    pub async fn create_job(&self, request: JobRequest) -> Result<JobHandle> {
        let handle = {
            let mut state = self.state.lock().await;
            if !state.running {
                return Err(Error::NotRunning(self.name.clone()));
            }

            state.next_serial += 1;
            let serial = state.next_serial;
            let id = self.job_ids.reserve(&request.revision, serial)?;
            let created = Job::create(
                serial,
                &self.name,
                id.clone(),
                request,
                &self.platforms,
                &mut state.queues,
            );
            let (job, handle) = match created {
                Ok(created) => created,
                Err(e) => {
                    self.job_ids.release(&id);
                    return Err(e);
                }
            };
            state.jobs.push(job);
            handle
        };

        self.spawn_watcher(&handle);
        Ok(handle)
    }

    /// Remove the job from the registry once it is ready.
    fn spawn_watcher(&self, handle: &JobHandle) {
        let mut phase = handle.subscribe();
        let serial = handle.serial();
        let job_id = handle.id().clone();
        let state = Arc::clone(&self.state);
        let job_ids = self.job_ids.clone();
        let project = self.name.clone();

        tokio::spawn(async move {
            let ready = match phase.wait_for(JobPhase::is_finished).await {
                Ok(phase) => matches!(*phase, JobPhase::Ready(_)),
                Err(_) => false,
            };
            if !ready {
                debug!(project = %project, job_id = %job_id, "Job watcher aborted");
                return;
            }

            let mut state = state.lock().await;
            let before = state.jobs.len();
            state.jobs.retain(|j| j.serial() != serial);
            // A stop may already have cleared the job and released its id.
            if state.jobs.len() < before {
                job_ids.release(&job_id);
                debug!(project = %project, job_id = %job_id, "Removed finished job");
            }
        });
    }

    /// Hand the next queued task of `platform` to a worker.
    ///
    /// With `test_only` the task is previewed and stays queued. An empty
    /// branch filter accepts every branch.
    pub async fn dispatch(
        &self,
        platform: Platform,
        branches: &HashSet<String>,
        worker_id: &str,
        test_only: bool,
    ) -> Result<Option<TaskDescriptor>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        debug!(
            project = %self.name,
            platform = %platform,
            worker = %worker_id,
            test_only,
            "Worker requested task"
        );

        let Some(queue) = state.queues.get_mut(platform) else {
            return Ok(None);
        };
        let entry = if test_only {
            queue.peek(branches).cloned()
        } else {
            queue.dequeue(branches)
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        let Some(job) = state.jobs.iter_mut().find(|j| j.serial() == entry.key.job_serial) else {
            error!(project = %self.name, task = %entry.key, "Queued task has no job");
            return Err(Error::Internal(format!(
                "queued task {} has no job",
                entry.key
            )));
        };
        let (branch, git_ref) = (job.branch().to_string(), job.git_ref().to_string());
        let context = job.context();

        let Some(task) = job.task_mut(&entry.key) else {
            error!(project = %self.name, task = %entry.key, "Queued task is not live");
            return Err(Error::Internal(format!(
                "queued task {} is not live",
                entry.key
            )));
        };

        let ticket = if test_only {
            task.preview_ticket()
        } else {
            let ticket = task.dispatch(worker_id)?;
            info!(
                project = %self.name,
                ticket = %ticket,
                worker = %worker_id,
                "Dispatched task"
            );
            let _ = self.events.send(SchedulerEvent::TaskStarted(TaskStarted {
                job: context,
                platform,
                ticket: ticket.to_string(),
                worker_id: worker_id.to_string(),
                started_at: ticket.created_at(),
            }));
            ticket
        };

        Ok(Some(TaskDescriptor {
            ticket: ticket.to_string(),
            job_id: entry.job_id,
            platform,
            branch,
            git_ref,
            test_only,
        }))
    }

    /// Record a worker result.
    ///
    /// Unknown tickets, tickets bound to another worker and repeated
    /// results all yield `None`.
    pub async fn submit_result(
        &self,
        ticket: &str,
        worker_id: &str,
        log: Option<String>,
        status: TaskStatus,
    ) -> Option<TaskResult> {
        let mut guard = self.state.lock().await;

        debug!(
            project = %self.name,
            ticket = %ticket,
            worker = %worker_id,
            status = %status,
            "Worker submitted result"
        );
        self.apply_result(&mut guard, ticket, worker_id, log, status)
    }

    /// Cancel a dispatched task on behalf of its worker, e.g. when the
    /// worker died. The task is requeued as a new attempt unless the job
    /// is stale.
    pub async fn cancel_task(&self, ticket: &str) -> Option<TaskResult> {
        let mut guard = self.state.lock().await;

        let worker_id = guard
            .jobs
            .iter()
            .find_map(|j| j.find_task_by_ticket(ticket))
            .and_then(|t| t.worker_id())
            .map(str::to_string)?;
        info!(
            project = %self.name,
            ticket = %ticket,
            worker = %worker_id,
            "Canceling dispatched task"
        );
        self.apply_result(&mut guard, ticket, &worker_id, None, TaskStatus::Canceled)
    }

    fn apply_result(
        &self,
        state: &mut ProjectState,
        ticket: &str,
        worker_id: &str,
        log: Option<String>,
        status: TaskStatus,
    ) -> Option<TaskResult> {
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.find_task_by_ticket(ticket).is_some())
        else {
            debug!(project = %self.name, ticket = %ticket, "No job owns ticket");
            return None;
        };

        let Some(submission) = job.submit_result(ticket, worker_id, log, status, &mut state.queues)
        else {
            warn!(
                project = %self.name,
                ticket = %ticket,
                worker = %worker_id,
                "Rejected result"
            );
            return None;
        };

        info!(
            project = %self.name,
            ticket = %ticket,
            status = %status,
            "Accepted result"
        );
        let _ = self.events.send(SchedulerEvent::TaskFinished(TaskReport {
            job: job.context(),
            result: submission.result.clone(),
        }));
        if let Some(report) = submission.finished {
            let _ = self.events.send(SchedulerEvent::JobFinished(report));
        }

        Some(submission.result)
    }

    /// Discard the queued work of a superseded job.
    ///
    /// Returns the discarded results, or `None` if no live job has the id.
    pub async fn handle_stale(&self, job_id: &JobId) -> Option<Vec<TaskResult>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id() == job_id && !j.is_ready())?;
        let (discarded, finished) = job.mark_stale(&mut state.queues);
        if let Some(report) = finished {
            let _ = self.events.send(SchedulerEvent::JobFinished(report));
        }
        Some(discarded)
    }

    pub async fn find_job_by_id(&self, job_id: &JobId) -> Option<JobInfo> {
        let state = self.state.lock().await;
        state.jobs.iter().find(|j| j.id() == job_id).map(Job::info)
    }

    pub async fn find_job_by_revision(&self, revision: &str) -> Option<JobInfo> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .find(|j| j.revision() == revision)
            .map(Job::info)
    }

    pub async fn find_job_by_change(&self, change_id: &str) -> Option<JobInfo> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .find(|j| j.change_id() == change_id)
            .map(Job::info)
    }

    pub async fn find_job_by_ticket(&self, ticket: &str) -> Option<JobInfo> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .find(|j| j.find_task_by_ticket(ticket).is_some())
            .map(Job::info)
    }

    /// Snapshot of every live job, oldest first.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.state.lock().await;
        state.jobs.iter().map(Job::info).collect()
    }

    pub async fn dump_queues(&self) -> QueueDump {
        let state = self.state.lock().await;
        state.queues.dump()
    }

    /// Jobs and queues taken under one lock, for operator display.
    pub async fn queue_report(&self) -> QueueReport {
        let state = self.state.lock().await;
        let report = QueueReport {
            project: self.name.clone(),
            jobs: state.jobs.iter().map(Job::info).collect(),
            queues: state.queues.dump(),
        };
        debug!(project = %self.name, pending = report.queues.pending(), "Dumped queues");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildbot_core::Verdict;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    const PLATFORMS: [Platform; 3] = [Platform::Linux, Platform::Windows, Platform::Mac];

    fn request(revision: &str, branch: &str) -> JobRequest {
        JobRequest {
            change_id: format!("I{}", revision),
            branch: branch.to_string(),
            git_ref: format!("refs/changes/{}", revision),
            revision: revision.to_string(),
        }
    }

    async fn started() -> ProjectScheduler {
        let (events, _) = broadcast::channel(64);
        let scheduler = ProjectScheduler::new("core", &PLATFORMS, events).unwrap();
        scheduler.start().await;
        scheduler
    }

    fn any_branch() -> HashSet<String> {
        HashSet::new()
    }

    async fn pull(scheduler: &ProjectScheduler, platform: Platform, worker: &str) -> Option<TaskDescriptor> {
        scheduler
            .dispatch(platform, &any_branch(), worker, false)
            .await
            .unwrap()
    }

    async fn wait_until_removed(scheduler: &ProjectScheduler) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !scheduler.list_jobs().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job was not removed from the registry");
    }

    #[test]
    fn test_new_without_platforms_fails() {
        let (events, _) = broadcast::channel(4);
        let result = ProjectScheduler::new("core", &[], events);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_job_requires_start() {
        let (events, _) = broadcast::channel(4);
        let scheduler = ProjectScheduler::new("core", &PLATFORMS, events).unwrap();

        let result = scheduler.create_job(request("abcdefghij", "master")).await;
        assert!(matches!(result, Err(Error::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_complete_job() {
        let scheduler = started().await;
        let mut handle = scheduler
            .create_job(request("abcdefghijklmnopqrstuvwxyz", "master"))
            .await
            .unwrap();

        let linux = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        assert_eq!(linux.branch, "master");
        assert!(
            scheduler
                .submit_result(&linux.ticket, "42", Some("url".to_string()), TaskStatus::Success)
                .await
                .is_some()
        );
        assert!(pull(&scheduler, Platform::Linux, "42").await.is_none());

        let windows = pull(&scheduler, Platform::Windows, "42").await.unwrap();
        scheduler
            .submit_result(&windows.ticket, "42", None, TaskStatus::Success)
            .await
            .unwrap();
        assert!(pull(&scheduler, Platform::Windows, "42").await.is_none());
        assert!(!handle.is_ready());

        let mac = pull(&scheduler, Platform::Mac, "42").await.unwrap();
        scheduler
            .submit_result(&mac.ticket, "42", None, TaskStatus::Success)
            .await
            .unwrap();
        assert!(handle.is_ready());

        let report = handle.wait().await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert!(report.results.iter().all(|r| r.discarded_siblings.is_empty()));

        wait_until_removed(&scheduler).await;
    }

    #[tokio::test]
    async fn test_failure_short_circuits_queued_platforms() {
        let scheduler = started().await;
        let handle = scheduler
            .create_job(request("abcdefghijklmnopqrstuvwxyz", "master"))
            .await
            .unwrap();

        let linux = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        let result = scheduler
            .submit_result(&linux.ticket, "42", Some("url".to_string()), TaskStatus::Failed)
            .await
            .unwrap();

        assert_eq!(
            result.discarded_siblings,
            vec![Platform::Windows, Platform::Mac]
        );
        assert!(handle.is_ready());
        assert_eq!(handle.report().unwrap().verdict, Verdict::Failure);

        for platform in PLATFORMS {
            assert!(pull(&scheduler, platform, "42").await.is_none());
        }
        assert_eq!(scheduler.dump_queues().await.pending(), 0);
    }

    #[tokio::test]
    async fn test_repeated_result_is_ignored() {
        let scheduler = started().await;
        scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();

        let linux = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        assert!(
            scheduler
                .submit_result(&linux.ticket, "42", None, TaskStatus::Success)
                .await
                .is_some()
        );
        assert!(
            scheduler
                .submit_result(&linux.ticket, "42", None, TaskStatus::Success)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_result_from_other_worker_is_rejected() {
        let scheduler = started().await;
        scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();

        let linux = pull(&scheduler, Platform::Linux, "worker-a").await.unwrap();
        assert!(
            scheduler
                .submit_result(&linux.ticket, "worker-b", None, TaskStatus::Failed)
                .await
                .is_none()
        );

        // The rightful worker can still report.
        assert!(
            scheduler
                .submit_result(&linux.ticket, "worker-a", None, TaskStatus::Success)
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_ignored() {
        let scheduler = started().await;
        assert!(
            scheduler
                .submit_result("deadbee_linux", "42", None, TaskStatus::Success)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_cancel_requeues_platform() {
        let scheduler = started().await;
        let handle = scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();

        let linux = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        scheduler
            .submit_result(&linux.ticket, "42", None, TaskStatus::Canceled)
            .await
            .unwrap();

        assert!(!handle.is_ready());
        let dump = scheduler.dump_queues().await;
        assert_eq!(dump.get(Platform::Linux).len(), 1);
        assert_eq!(dump.get(Platform::Linux)[0].key.attempt, 1);

        let retry = pull(&scheduler, Platform::Linux, "43").await.unwrap();
        assert_ne!(retry.ticket, linux.ticket);
    }

    #[tokio::test]
    async fn test_test_only_dispatch_does_not_consume() {
        let scheduler = started().await;
        scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();

        let preview = scheduler
            .dispatch(Platform::Linux, &any_branch(), "42", true)
            .await
            .unwrap()
            .unwrap();
        assert!(preview.test_only);

        let job = scheduler.find_job_by_revision("abcdefghij").await.unwrap();
        assert_eq!(job.task(Platform::Linux).unwrap().state, "pending");

        let real = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        assert_eq!(real.ticket, preview.ticket);
        assert!(!real.test_only);

        // A preview ticket grants nothing until it is really dispatched.
        let job = scheduler.find_job_by_ticket(&real.ticket).await.unwrap();
        assert_eq!(job.task(Platform::Linux).unwrap().worker_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_branch_filter_dispatch() {
        let scheduler = started().await;
        scheduler
            .create_job(request("aaaaaaa1", "A"))
            .await
            .unwrap();
        scheduler
            .create_job(request("bbbbbbb2", "B"))
            .await
            .unwrap();
        scheduler
            .create_job(request("aaaaaaa3", "A"))
            .await
            .unwrap();

        let only_b: HashSet<String> = ["B".to_string()].into_iter().collect();
        let task = scheduler
            .dispatch(Platform::Linux, &only_b, "42", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.branch, "B");
        assert_eq!(task.job_id.as_str(), "bbbbbbb");

        let remaining: Vec<String> = scheduler
            .dump_queues()
            .await
            .get(Platform::Linux)
            .iter()
            .map(|e| e.job_id.to_string())
            .collect();
        assert_eq!(remaining, vec!["aaaaaaa", "aaaaaaa"]);
        assert!(
            scheduler
                .dispatch(Platform::Linux, &only_b, "42", false)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_handle_stale() {
        let scheduler = started().await;
        let mut handle = scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();
        let linux = pull(&scheduler, Platform::Linux, "42").await.unwrap();

        let discarded = scheduler.handle_stale(handle.id()).await.unwrap();
        assert_eq!(discarded.len(), 2);
        assert!(!handle.is_ready());
        assert!(scheduler.find_job_by_change("Iabcdefghij").await.unwrap().stale);

        scheduler
            .submit_result(&linux.ticket, "42", None, TaskStatus::Success)
            .await
            .unwrap();
        let report = handle.wait().await.unwrap();
        assert!(report.job.stale);
        assert!(!report.is_authoritative());
    }

    #[tokio::test]
    async fn test_handle_stale_unknown_job() {
        let scheduler = started().await;
        let id = JobId::from_revision("0000000").unwrap();
        assert!(scheduler.handle_stale(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_aborts_jobs_and_ignores_late_results() {
        let scheduler = started().await;
        let mut handle = scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();
        let linux = pull(&scheduler, Platform::Linux, "42").await.unwrap();

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        assert!(handle.wait().await.is_none());
        assert!(scheduler.list_jobs().await.is_empty());
        assert!(pull(&scheduler, Platform::Windows, "42").await.is_none());
        assert!(
            scheduler
                .submit_result(&linux.ticket, "42", None, TaskStatus::Success)
                .await
                .is_none()
        );

        // Restarting gives a fresh, empty project.
        scheduler.start().await;
        assert_eq!(scheduler.dump_queues().await.pending(), 0);
    }

    #[tokio::test]
    async fn test_shared_revision_prefix_gets_distinct_tickets() {
        let scheduler = started().await;
        let first = scheduler
            .create_job(request("abcdefg1111", "master"))
            .await
            .unwrap();
        let second = scheduler
            .create_job(request("abcdefg2222", "master"))
            .await
            .unwrap();
        assert_ne!(first.id(), second.id());

        let a = pull(&scheduler, Platform::Linux, "wa").await.unwrap();
        let b = pull(&scheduler, Platform::Linux, "wb").await.unwrap();
        assert_ne!(a.ticket, b.ticket);

        assert!(
            scheduler
                .submit_result(&a.ticket, "wa", None, TaskStatus::Failed)
                .await
                .is_some()
        );
        assert!(
            scheduler
                .submit_result(&b.ticket, "wb", None, TaskStatus::Failed)
                .await
                .is_some()
        );
        assert!(first.is_ready());
        assert!(second.is_ready());
        assert_eq!(first.report().unwrap().job.revision, "abcdefg1111");
        assert_eq!(second.report().unwrap().job.revision, "abcdefg2222");
    }

    #[tokio::test]
    async fn test_same_worker_on_two_prefix_twins() {
        let scheduler = started().await;
        let first = scheduler
            .create_job(request("abcdefg1111", "master"))
            .await
            .unwrap();
        let second = scheduler
            .create_job(request("abcdefg2222", "master"))
            .await
            .unwrap();

        pull(&scheduler, Platform::Linux, "42").await.unwrap();
        let b = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        scheduler
            .submit_result(&b.ticket, "42", None, TaskStatus::Failed)
            .await
            .unwrap();

        assert!(second.is_ready());
        assert!(!first.is_ready());
        let job = scheduler.find_job_by_id(first.id()).await.unwrap();
        assert_eq!(job.task(Platform::Linux).unwrap().state, "dispatched");
    }

    #[tokio::test]
    async fn test_job_ids_are_released() {
        let (events, _) = broadcast::channel(16);
        let ids = LiveJobIds::new();
        let scheduler =
            ProjectScheduler::with_job_ids("online", &[Platform::Linux], events, ids.clone())
                .unwrap();
        scheduler.start().await;

        let handle = scheduler
            .create_job(request("abcdefg1111", "master"))
            .await
            .unwrap();
        assert!(ids.contains(handle.id()));

        let task = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        scheduler
            .submit_result(&task.ticket, "42", None, TaskStatus::Success)
            .await
            .unwrap();
        wait_until_removed(&scheduler).await;
        assert!(ids.is_empty());

        scheduler
            .create_job(request("abcdefg2222", "master"))
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        scheduler.stop().await;
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_task_requeues_next_attempt() {
        let scheduler = started().await;
        let handle = scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();
        let linux = pull(&scheduler, Platform::Linux, "dead-box").await.unwrap();

        let result = scheduler.cancel_task(&linux.ticket).await.unwrap();
        assert_eq!(result.status, TaskStatus::Canceled);
        assert_eq!(result.worker_id.as_deref(), Some("dead-box"));
        assert!(!handle.is_ready());

        let queued = scheduler.dump_queues().await;
        assert_eq!(queued.get(Platform::Linux).len(), 1);
        assert_eq!(queued.get(Platform::Linux)[0].key.attempt, 1);

        // The dead worker can no longer report, and a second cancel is a no-op.
        assert!(
            scheduler
                .submit_result(&linux.ticket, "dead-box", None, TaskStatus::Success)
                .await
                .is_none()
        );
        assert!(scheduler.cancel_task(&linux.ticket).await.is_none());

        let retry = pull(&scheduler, Platform::Linux, "42").await.unwrap();
        assert_eq!(retry.ticket, format!("{}_linux_1", handle.id()));
    }

    #[tokio::test]
    async fn test_cancel_task_requires_dispatch() {
        let scheduler = started().await;
        let handle = scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();
        let preview = scheduler
            .dispatch(Platform::Linux, &any_branch(), "42", true)
            .await
            .unwrap()
            .unwrap();

        assert!(scheduler.cancel_task(&preview.ticket).await.is_none());
        assert!(scheduler.cancel_task("unknown_linux").await.is_none());
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn test_queue_report_lists_jobs_and_queues() {
        let scheduler = started().await;
        scheduler
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();
        pull(&scheduler, Platform::Linux, "42").await.unwrap();

        let report = scheduler.queue_report().await;
        assert_eq!(report.project, "core");
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.task_count(), 3);
        assert_eq!(report.queues.pending(), 2);

        let text = report.to_string();
        assert!(text.contains("Job: DISPATCHED"));
        assert!(text.contains("Queue for platform: windows"));
    }

    #[tokio::test]
    async fn test_events_follow_task_lifecycle() {
        let scheduler = started().await;
        let mut events = scheduler.subscribe();

        let single = {
            let (tx, _) = broadcast::channel(16);
            let scheduler = ProjectScheduler::new("online", &[Platform::Linux], tx).unwrap();
            scheduler.start().await;
            scheduler
        };
        let mut single_events = single.subscribe();
        single
            .create_job(request("abcdefghij", "master"))
            .await
            .unwrap();
        let linux = pull(&single, Platform::Linux, "42").await.unwrap();
        single
            .submit_result(&linux.ticket, "42", Some("url".to_string()), TaskStatus::Success)
            .await
            .unwrap();

        match single_events.try_recv().unwrap() {
            SchedulerEvent::TaskStarted(e) => {
                assert_eq!(e.ticket, linux.ticket);
                assert_eq!(e.worker_id, "42");
                assert_eq!(e.job.project, "online");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match single_events.try_recv().unwrap() {
            SchedulerEvent::TaskFinished(e) => {
                assert_eq!(e.result.status, TaskStatus::Success);
                assert_eq!(e.result.log.as_deref(), Some("url"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match single_events.try_recv().unwrap() {
            SchedulerEvent::JobFinished(report) => {
                assert_eq!(report.verdict, Verdict::Success);
                assert_eq!(report.job.change_id, "Iabcdefghij");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(single_events.try_recv(), Err(TryRecvError::Empty)));

        // Nothing happened on the other project.
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }
}
