//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use buildbot_core::Platform;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of the scheduler notification channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Platforms every project builds on unless it overrides them.
    pub platforms: Vec<Platform>,
    /// Projects that get their own scheduler.
    pub projects: Vec<ProjectConfig>,
    /// Capacity of the notification channel shared by all projects.
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Per-project platform set, replacing the global one.
    pub platforms: Option<Vec<Platform>>,
}

impl SystemConfig {
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Effective platform set of a project.
    pub fn platforms_for(&self, project: &str) -> Option<&[Platform]> {
        let project = self.project(project)?;
        Some(project.platforms.as_deref().unwrap_or(&self.platforms))
    }
}

/// Read and parse a system configuration file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut platforms: Option<Vec<Platform>> = None;
    let mut projects: Vec<ProjectConfig> = Vec::new();
    let mut event_buffer = DEFAULT_EVENT_BUFFER;

    for node in doc.nodes() {
        match node.name().value() {
            "platforms" => {
                platforms = Some(parse_platform_list(node)?);
            }
            "events" => {
                if let Some(buffer) = get_usize_prop(node, "buffer")? {
                    if buffer == 0 {
                        return Err(ConfigError::InvalidValue {
                            field: "events buffer".to_string(),
                            message: "must be greater than zero".to_string(),
                        });
                    }
                    event_buffer = buffer;
                }
            }
            "project" => {
                let project = parse_project(node)?;
                if projects.iter().any(|p| p.name == project.name) {
                    return Err(ConfigError::Duplicate(format!("project '{}'", project.name)));
                }
                projects.push(project);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(SystemConfig {
        platforms: platforms.unwrap_or_else(|| Platform::ALL.to_vec()),
        projects,
        event_buffer,
    })
}

fn parse_project(node: &KdlNode) -> ConfigResult<ProjectConfig> {
    let name = get_first_string_arg(node)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;

    let mut platforms = None;
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "platforms" {
                platforms = Some(parse_platform_list(child)?);
            }
        }
    }

    Ok(ProjectConfig { name, platforms })
}

fn parse_platform_list(node: &KdlNode) -> ConfigResult<Vec<Platform>> {
    let mut platforms = Vec::new();
    for name in get_all_string_args(node) {
        let platform: Platform = name.parse().map_err(|_| ConfigError::InvalidValue {
            field: "platforms".to_string(),
            message: format!("unknown platform: {}", name),
        })?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }

    if platforms.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "platforms".to_string(),
            message: "at least one platform is required".to_string(),
        });
    }
    Ok(platforms)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_usize_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<usize>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    value
        .as_integer()
        .and_then(|v| usize::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected a non-negative integer, got {}", value),
        })
}
