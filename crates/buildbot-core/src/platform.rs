//! Build platforms.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// A build target environment workers can pull work for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    Mac,
}

impl Platform {
    /// Every known platform, in default configuration order.
    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::Windows, Platform::Mac];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Mac => "mac",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            "mac" | "macos" | "macosx" => Ok(Platform::Mac),
            other => Err(Error::InvalidInput(format!("unknown platform: {}", other))),
        }
    }
}
