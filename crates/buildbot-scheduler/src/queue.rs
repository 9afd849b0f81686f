//! Per-platform queues of pending tasks.
//!
//! Queues only hold references to tasks (their key plus what the branch
//! filter needs); the tasks themselves stay owned by their job. Mutual
//! exclusion comes from the project lock that owns every queue.

use buildbot_core::{JobId, Platform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::task::TaskKey;

/// A pending task waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub key: TaskKey,
    pub job_id: JobId,
    pub branch: String,
}

impl QueueEntry {
    fn matches(&self, branches: &HashSet<String>) -> bool {
        branches.is_empty() || branches.contains(&self.branch)
    }
}

/// FIFO of pending tasks for one platform.
#[derive(Debug)]
pub struct PlatformQueue {
    platform: Platform,
    entries: VecDeque<QueueEntry>,
}

impl PlatformQueue {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            entries: VecDeque::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn enqueue(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    /// Remove and return the first entry whose branch passes the filter.
    ///
    /// An empty filter matches every branch. Skipped entries keep their
    /// relative order.
    pub fn dequeue(&mut self, branches: &HashSet<String>) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| e.matches(branches))?;
        self.entries.remove(index)
    }

    /// Like [`dequeue`](Self::dequeue), without removing the entry.
    pub fn peek(&self, branches: &HashSet<String>) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.matches(branches))
    }

    /// Retract a task that was discarded while still queued.
    pub fn remove(&mut self, key: &TaskKey) -> bool {
        match self.entries.iter().position(|e| e.key == *key) {
            Some(index) => self.entries.remove(index).is_some(),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}

/// The queues of one project, one per configured platform.
#[derive(Debug, Default)]
pub struct PlatformQueues {
    queues: BTreeMap<Platform, PlatformQueue>,
}

impl PlatformQueues {
    pub fn new(platforms: &[Platform]) -> Self {
        Self {
            queues: platforms
                .iter()
                .map(|p| (*p, PlatformQueue::new(*p)))
                .collect(),
        }
    }

    pub fn get(&self, platform: Platform) -> Option<&PlatformQueue> {
        self.queues.get(&platform)
    }

    pub fn get_mut(&mut self, platform: Platform) -> Option<&mut PlatformQueue> {
        self.queues.get_mut(&platform)
    }

    /// Append to the queue of the entry's platform. Returns false when the
    /// platform has no queue, e.g. after the project was stopped.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        match self.queues.get_mut(&entry.key.platform) {
            Some(queue) => {
                queue.enqueue(entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &TaskKey) -> bool {
        self.queues
            .get_mut(&key.platform)
            .is_some_and(|q| q.remove(key))
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }

    pub fn dump(&self) -> QueueDump {
        QueueDump {
            queues: self
                .queues
                .values()
                .map(|q| (q.platform(), q.iter().cloned().collect()))
                .collect(),
        }
    }
}

/// Snapshot of every platform queue of a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueDump {
    pub queues: BTreeMap<Platform, Vec<QueueEntry>>,
}

impl QueueDump {
    pub fn pending(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    pub fn get(&self, platform: Platform) -> &[QueueEntry] {
        self.queues.get(&platform).map(Vec::as_slice).unwrap_or_default()
    }
}
