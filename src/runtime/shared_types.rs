// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: ContainerConfig, ContainerInfo, resource limits, and log configuration.

use crate::types::{ContainerId, ImageRef};
use std::collections::HashMap;

/// Configuration for creating a deployment container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Name for the container.
    pub name: String,
    /// Runner image to run.
    pub image: ImageRef,
    /// Full command, e.g. `["/bin/sh", "-c", "..."]`.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Labels to apply.
    pub labels: HashMap<String, String>,
    /// Working directory.
    pub working_dir: Option<String>,
    /// Host bind mounts.
    pub mounts: Vec<BindMount>,
    /// Isolation network to attach at creation.
    pub network: Option<String>,
    /// Resource limits.
    pub resources: Option<ResourceLimits>,
    /// Security options, e.g. `no-new-privileges:true`.
    pub security_opt: Vec<String>,
    /// Container log driver configuration.
    pub log_config: Option<LogConfig>,
}

/// A host bind mount.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Resource limits for a container. CPU is fractional cores, translated to
/// quota/period by the driver; memory is megabytes, translated to bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceLimits {
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
}

/// Container log driver configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub driver: String,
    pub options: HashMap<String, String>,
}

impl LogConfig {
    /// Bounded json-file logging so runaway apps cannot fill the disk.
    pub fn bounded_json_file() -> Self {
        let mut options = HashMap::new();
        options.insert("max-size".to_string(), "10m".to_string());
        options.insert("max-file".to_string(), "5".to_string());
        Self {
            driver: "json-file".to_string(),
            options,
        }
    }
}

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

/// Information about a container from inspect.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: String,
    pub state: ContainerState,
    /// Exit code, when the container has exited.
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
    /// Attachment info keyed by network name.
    pub networks: HashMap<String, NetworkAttachment>,
}

/// Per-network attachment details for a container.
#[derive(Debug, Clone, Default)]
pub struct NetworkAttachment {
    pub ip_address: String,
}

/// Summary information about a container from list.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: String,
    pub state: String,
    pub labels: HashMap<String, String>,
}
