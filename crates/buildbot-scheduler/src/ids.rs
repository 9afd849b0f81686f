//! Job ids in use by live jobs.
//!
//! Tickets are rendered from the job id, so two live jobs must never share
//! one. Every project of a [`BuildControl`](crate::BuildControl) draws from
//! the same set, which also keeps tickets unique across projects.

use buildbot_core::id::SHORT_ID_LEN;
use buildbot_core::{JobId, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LiveJobIds {
    ids: Arc<Mutex<HashSet<JobId>>>,
}

impl LiveJobIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the shortest free abbreviation of `revision`, starting at the
    /// usual short length. A revision whose every prefix is taken gets the
    /// short id tagged with `serial`.
    pub fn reserve(&self, revision: &str, serial: u64) -> Result<JobId> {
        let short = JobId::from_revision(revision)?;
        let full_len = revision.trim().chars().count().max(SHORT_ID_LEN);

        let mut ids = self.lock();
        for len in SHORT_ID_LEN..=full_len {
            let candidate = JobId::abbreviate(revision, len)?;
            if ids.insert(candidate.clone()) {
                if len > SHORT_ID_LEN {
                    debug!(job_id = %candidate, "Lengthened job id to avoid a live clash");
                }
                return Ok(candidate);
            }
        }

        let tagged = short.with_serial(serial);
        debug!(job_id = %tagged, "Revision already has a live job");
        ids.insert(tagged.clone());
        Ok(tagged)
    }

    pub fn release(&self, id: &JobId) -> bool {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reservation_uses_short_id() {
        let ids = LiveJobIds::new();
        let id = ids.reserve("abcdefg1111", 1).unwrap();
        assert_eq!(id.as_str(), "abcdefg");
        assert!(ids.contains(&id));
    }

    #[test]
    fn test_shared_prefix_is_lengthened() {
        let ids = LiveJobIds::new();
        let first = ids.reserve("abcdefg1111", 1).unwrap();
        let second = ids.reserve("abcdefg2222", 2).unwrap();
        let third = ids.reserve("abcdefg2233", 3).unwrap();

        assert_eq!(first.as_str(), "abcdefg");
        assert_eq!(second.as_str(), "abcdefg2");
        assert_eq!(third.as_str(), "abcdefg22");
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_same_revision_twice_is_tagged() {
        let ids = LiveJobIds::new();
        ids.reserve("abcdefg", 1).unwrap();
        let again = ids.reserve("abcdefg", 2).unwrap();
        assert_eq!(again.as_str(), "abcdefg~2");
    }

    #[test]
    fn test_release_frees_the_short_id() {
        let ids = LiveJobIds::new();
        let first = ids.reserve("abcdefg1111", 1).unwrap();
        assert!(ids.release(&first));
        assert!(!ids.release(&first));
        assert!(ids.is_empty());

        let next = ids.reserve("abcdefg2222", 2).unwrap();
        assert_eq!(next.as_str(), "abcdefg");
    }
}
