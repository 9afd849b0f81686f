//! KDL configuration parsing for the Buildbot review verifier.
//!
//! This crate handles parsing of the system configuration: which build
//! platforms exist and which projects get a scheduler of their own.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{ProjectConfig, SystemConfig, load_system_config, parse_system_config};
