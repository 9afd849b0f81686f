//! Routing across projects.
//!
//! Each configured project gets an independent [`ProjectScheduler`]; work on
//! one project never waits for another project's lock.

use buildbot_config::SystemConfig;
use buildbot_core::{Error, Platform, Result, TaskStatus};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::event::SchedulerEvent;
use crate::ids::LiveJobIds;
use crate::job::{JobHandle, JobRequest};
use crate::project::{ProjectScheduler, TaskDescriptor};
use crate::task::TaskResult;

/// All project schedulers of one process.
pub struct BuildControl {
    projects: BTreeMap<String, ProjectScheduler>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl BuildControl {
    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let job_ids = LiveJobIds::new();

        let mut projects = BTreeMap::new();
        for project in &config.projects {
            let platforms = config.platforms_for(&project.name).ok_or_else(|| {
                Error::NotFound(format!("project '{}'", project.name))
            })?;
            let scheduler = ProjectScheduler::with_job_ids(
                &project.name,
                platforms,
                events.clone(),
                job_ids.clone(),
            )?;
            projects.insert(project.name.clone(), scheduler);
        }

        Ok(Self { projects, events })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectScheduler> {
        self.projects.get(name)
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectScheduler> {
        self.projects.values()
    }

    pub async fn start(&self) {
        for scheduler in self.projects.values() {
            scheduler.start().await;
        }
        info!(projects = self.projects.len(), "Build control started");
    }

    pub async fn stop(&self) {
        for scheduler in self.projects.values() {
            scheduler.stop().await;
        }
        info!("Build control stopped");
    }

    /// Create a job on `project`. `None` when the project is not configured.
    pub async fn create_job(&self, project: &str, request: JobRequest) -> Result<Option<JobHandle>> {
        match self.project(project) {
            Some(scheduler) => scheduler.create_job(request).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn dispatch(
        &self,
        project: &str,
        platform: Platform,
        branches: &HashSet<String>,
        worker_id: &str,
        test_only: bool,
    ) -> Result<Option<TaskDescriptor>> {
        match self.project(project) {
            Some(scheduler) => {
                scheduler
                    .dispatch(platform, branches, worker_id, test_only)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Deliver a worker result to whichever project issued the ticket.
    pub async fn submit_result(
        &self,
        ticket: &str,
        worker_id: &str,
        log: Option<String>,
        status: TaskStatus,
    ) -> Option<TaskResult> {
        for scheduler in self.projects.values() {
            if scheduler.find_job_by_ticket(ticket).await.is_none() {
                continue;
            }
            return scheduler
                .submit_result(ticket, worker_id, log, status)
                .await;
        }
        debug!(ticket = %ticket, "Ticket not issued by any project");
        None
    }

    /// Cancel a dispatched task in whichever project issued the ticket.
    pub async fn cancel_task(&self, ticket: &str) -> Option<TaskResult> {
        for scheduler in self.projects.values() {
            if let Some(result) = scheduler.cancel_task(ticket).await {
                return Some(result);
            }
        }
        debug!(ticket = %ticket, "No dispatched task to cancel");
        None
    }

    /// Tickets are unique across projects, since every project draws its
    /// job ids from the same [`LiveJobIds`].
    pub async fn find_project_by_ticket(&self, ticket: &str) -> Option<&str> {
        for (name, scheduler) in &self.projects {
            if scheduler.find_job_by_ticket(ticket).await.is_some() {
                return Some(name.as_str());
            }
        }
        None
    }
}
