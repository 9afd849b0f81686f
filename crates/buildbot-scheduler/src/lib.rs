//! Build dispatch for the Buildbot review verifier.
//!
//! Review revisions become jobs, jobs fan out into one task per platform,
//! and tasks wait in per-platform queues until a worker pulls them. Workers
//! later push their result back with the ticket they were given; the
//! project scheduler correlates it and decides the job verdict.

pub mod control;
pub mod event;
pub mod ids;
pub mod job;
pub mod project;
pub mod queue;
pub mod report;
pub mod task;

pub use control::BuildControl;
pub use event::{JobContext, JobReport, SchedulerEvent, TaskReport, TaskStarted};
pub use ids::LiveJobIds;
pub use job::{JobHandle, JobInfo, JobPhase, JobRequest};
pub use project::{ProjectScheduler, TaskDescriptor};
pub use queue::{PlatformQueue, PlatformQueues, QueueDump, QueueEntry};
pub use report::QueueReport;
pub use task::{TaskInfo, TaskKey, TaskResult, TaskState};
