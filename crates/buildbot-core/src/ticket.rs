//! Tickets correlate a dispatched task with the worker result for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{JobId, Platform};

/// Immutable token handed to a worker when it claims a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    job_id: JobId,
    platform: Platform,
    attempt: u32,
    created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(job_id: JobId, platform: Platform, attempt: u32) -> Self {
        let id = if attempt == 0 {
            format!("{}_{}", job_id, platform)
        } else {
            format!("{}_{}_{}", job_id, platform, attempt)
        };
        Self {
            id,
            job_id,
            platform,
            attempt,
            created_at: Utc::now(),
        }
    }

    /// The opaque string form workers echo back with their result.
    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl PartialEq<str> for Ticket {
    fn eq(&self, other: &str) -> bool {
        self.id == other
    }
}
