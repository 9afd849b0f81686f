//! CLI command implementations.

use anyhow::{Context, Result, bail};
use buildbot_config::{SystemConfig, load_system_config};
use buildbot_core::{Platform, TaskStatus};
use buildbot_scheduler::{BuildControl, JobRequest, SchedulerEvent};
use serde::Serialize;
use std::collections::HashSet;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct MatrixRow<'a> {
    project: &'a str,
    platforms: &'a [Platform],
}

fn matrix(config: &SystemConfig) -> Vec<MatrixRow<'_>> {
    config
        .projects
        .iter()
        .filter_map(|p| {
            config.platforms_for(&p.name).map(|platforms| MatrixRow {
                project: &p.name,
                platforms,
            })
        })
        .collect()
}

fn load(path: &str) -> Result<SystemConfig> {
    load_system_config(path).with_context(|| format!("failed to load configuration {}", path))
}

pub fn validate(path: &str, json: bool) -> Result<()> {
    let config = load(path)?;
    let rows = matrix(&config);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Configuration is valid");
    println!("{:<20} PLATFORMS", "PROJECT");
    for row in &rows {
        let platforms: Vec<&str> = row.platforms.iter().map(Platform::as_str).collect();
        println!("{:<20} {}", row.project, platforms.join(", "));
    }
    Ok(())
}

/// Schedule `revision` on every project and let a local worker report
/// `status` for each task, printing the resulting review comments.
pub async fn dry_run(path: &str, revision: &str, branch: &str, status: &str) -> Result<()> {
    let status: TaskStatus = status.parse()?;
    if status.is_canceled() {
        bail!("a canceled task is requeued forever in a dry run; pick another status");
    }

    let config = load(path)?;
    let control = BuildControl::from_config(&config)?;
    let mut events = control.subscribe();
    control.start().await;

    let request = JobRequest {
        change_id: format!("I{}", revision),
        branch: branch.to_string(),
        git_ref: format!("refs/dry-run/{}", revision),
        revision: revision.to_string(),
    };
    let any_branch = HashSet::new();

    for scheduler in control.projects() {
        let mut handle = scheduler.create_job(request.clone()).await?;
        for platform in scheduler.platforms() {
            let Some(task) = scheduler
                .dispatch(*platform, &any_branch, "dry-run", false)
                .await?
            else {
                continue;
            };
            scheduler
                .submit_result(&task.ticket, "dry-run", None, status)
                .await;
        }
        print!("{}", scheduler.queue_report().await);
        if handle.wait().await.is_none() {
            bail!("job on {} was aborted", scheduler.name());
        }
    }
    control.stop().await;

    let (drained, skipped) = drain(&mut events);
    if skipped > 0 {
        warn!(skipped, "Dropped events; raise the events buffer to see every report");
    }
    for event in drained {
        print_event(event);
    }
    Ok(())
}

/// Everything still buffered, plus the number of events overwritten
/// before they could be read.
fn drain(events: &mut broadcast::Receiver<SchedulerEvent>) -> (Vec<SchedulerEvent>, u64) {
    let mut drained = Vec::new();
    let mut skipped = 0;
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(n)) => skipped += n,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    (drained, skipped)
}

fn print_event(event: SchedulerEvent) {
    match event {
        SchedulerEvent::TaskStarted(started) => {
            info!(ticket = %started.ticket, "Task started");
        }
        SchedulerEvent::TaskFinished(report) => println!("{}\n", report),
        SchedulerEvent::JobFinished(report) => println!("{}\n", report),
    }
}
