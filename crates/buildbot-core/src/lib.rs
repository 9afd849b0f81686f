//! Core domain types for the Buildbot review verifier.
//!
//! This crate contains:
//! - Job identifiers derived from review revisions
//! - Build platforms and task status enumerations
//! - Tickets binding dispatched work to a worker
//! - The shared error type

pub mod error;
pub mod id;
pub mod platform;
pub mod status;
pub mod ticket;

pub use error::{Error, Result};
pub use id::JobId;
pub use platform::Platform;
pub use status::{TaskStatus, Verdict};
pub use ticket::Ticket;
