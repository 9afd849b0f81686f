//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of revision characters kept in a job id.
pub const SHORT_ID_LEN: usize = 7;

/// Identifier of a review-revision build.
/// It is the abbreviated revision, the same way a short commit sha is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Derive the job id from a full revision identifier.
    pub fn from_revision(revision: &str) -> Result<Self> {
        Self::abbreviate(revision, SHORT_ID_LEN)
    }

    /// Keep the first `len` characters of `revision`.
    pub fn abbreviate(revision: &str, len: usize) -> Result<Self> {
        let revision = revision.trim();
        if revision.is_empty() {
            return Err(Error::InvalidInput("revision must not be empty".to_string()));
        }
        Ok(Self(revision.chars().take(len.max(1)).collect()))
    }

    /// A variant of this id tagged with a serial number, for a revision
    /// whose every prefix is already taken.
    pub fn with_serial(&self, serial: u64) -> Self {
        Self(format!("{}~{}", self.0, serial))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_revision(s)
    }
}
