// ABOUTME: Engine settings loaded from skiff.yml.
// ABOUTME: Handles YAML parsing, defaults, and resource ceiling normalization.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::Runner;

pub const SETTINGS_FILENAME: &str = "skiff.yml";
pub const SETTINGS_FILENAME_ALT: &str = "skiff.yaml";
pub const SETTINGS_FILENAME_DIR: &str = ".skiff/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Scheme used for generated URLs and routing entrypoints.
    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,

    /// Base domain all generated subdomains live under.
    #[serde(default)]
    pub deploy_domain: String,

    /// Container runtime endpoint. Unix socket path or tcp/http URL.
    #[serde(default = "default_docker_host")]
    pub docker_host: String,

    /// Directory the reverse proxy watches for dynamic config files.
    #[serde(default = "default_traefik_dir")]
    pub traefik_dir: PathBuf,

    /// Data directory as seen by the engine.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Data directory as seen by the container runtime host, when the engine
    /// itself runs containerized. Falls back to `data_dir`.
    #[serde(default)]
    pub host_data_dir: Option<PathBuf>,

    /// Port the deployed application must listen on.
    #[serde(default = "default_runner_port")]
    pub runner_port: u16,

    /// Wall-clock budget for a deployment to become ready.
    #[serde(default = "default_deployment_timeout", with = "humantime_serde")]
    pub deployment_timeout: Duration,

    /// Delay between stopping a container and deleting it, so log drains can
    /// finish.
    #[serde(default = "default_container_delete_grace", with = "humantime_serde")]
    pub container_delete_grace: Duration,

    #[serde(default = "default_monitor_poll_interval", with = "humantime_serde")]
    pub monitor_poll_interval: Duration,

    #[serde(default = "default_reconcile_interval", with = "humantime_serde")]
    pub reconcile_interval: Duration,

    /// Probe budget for a single readiness check.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Stop timeout handed to the runtime when halting containers.
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Concurrent jobs in the worker pool.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// CPU cores granted to a deployment when the project does not override.
    #[serde(default)]
    pub default_cpus: Option<f64>,

    /// Ceiling for per-deployment CPU overrides. Overrides are only honored
    /// when both a default and a ceiling are configured.
    #[serde(default)]
    pub max_cpus: Option<f64>,

    #[serde(default)]
    pub default_memory_mb: Option<u64>,

    #[serde(default)]
    pub max_memory_mb: Option<u64>,

    /// Runner catalog, loaded by a collaborator.
    #[serde(default)]
    pub runners: Vec<Runner>,

    /// Container id of the monitor's probe identity. When unset, the monitor
    /// discovers it by the `skiff.probe` label.
    #[serde(default)]
    pub probe_container_id: Option<String>,

    /// Public IP advertised to deployed applications, if any.
    #[serde(default)]
    pub server_ip: Option<String>,
}

fn default_url_scheme() -> String {
    "https".to_string()
}

fn default_docker_host() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_traefik_dir() -> PathBuf {
    PathBuf::from("/var/lib/skiff/traefik")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/skiff")
}

fn default_runner_port() -> u16 {
    8000
}

fn default_deployment_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_container_delete_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_monitor_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_jobs() -> usize {
    8
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url_scheme: default_url_scheme(),
            deploy_domain: String::new(),
            docker_host: default_docker_host(),
            traefik_dir: default_traefik_dir(),
            data_dir: default_data_dir(),
            host_data_dir: None,
            runner_port: default_runner_port(),
            deployment_timeout: default_deployment_timeout(),
            container_delete_grace: default_container_delete_grace(),
            monitor_poll_interval: default_monitor_poll_interval(),
            reconcile_interval: default_reconcile_interval(),
            probe_timeout: default_probe_timeout(),
            stop_timeout: default_stop_timeout(),
            max_jobs: default_max_jobs(),
            default_cpus: None,
            max_cpus: None,
            default_memory_mb: None,
            max_memory_mb: None,
            runners: Vec::new(),
            probe_container_id: None,
            server_ip: None,
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut settings: Settings = serde_yaml::from_str(yaml).map_err(Error::from)?;
        settings.normalize();
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(SETTINGS_FILENAME),
            dir.join(SETTINGS_FILENAME_ALT),
            dir.join(SETTINGS_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::SettingsNotFound(dir.to_path_buf()))
    }

    /// Per-deployment CPU overrides are honored only when the platform
    /// configures both a default and a ceiling.
    pub fn allow_custom_cpu(&self) -> bool {
        self.default_cpus.is_some() && self.max_cpus.is_some()
    }

    pub fn allow_custom_memory(&self) -> bool {
        self.default_memory_mb.is_some() && self.max_memory_mb.is_some()
    }

    /// Host-side base for storage bind mounts.
    pub fn host_storage_base(&self) -> &Path {
        self.host_data_dir.as_deref().unwrap_or(&self.data_dir)
    }

    pub fn runner(&self, slug: &str) -> Option<&Runner> {
        self.runners.iter().find(|r| r.slug == slug)
    }

    /// Drop inconsistent resource limit configuration instead of failing
    /// startup. A ceiling without a default (or vice versa), non-positive
    /// values, and a default above its ceiling are all normalized away with
    /// a logged warning.
    fn normalize(&mut self) {
        if let Some(cpus) = self.default_cpus
            && cpus <= 0.0
        {
            tracing::warn!("default_cpus must be positive; ignoring");
            self.default_cpus = None;
        }
        if let Some(cpus) = self.max_cpus
            && cpus <= 0.0
        {
            tracing::warn!("max_cpus must be positive; ignoring");
            self.max_cpus = None;
        }
        if self.default_cpus.is_none() && self.max_cpus.is_some() {
            tracing::warn!("max_cpus set without default_cpus; ignoring");
            self.max_cpus = None;
        }
        if let (Some(default), Some(max)) = (self.default_cpus, self.max_cpus)
            && default > max
        {
            tracing::warn!(default, max, "default_cpus exceeds max_cpus; clamping");
            self.default_cpus = Some(max);
        }

        if let Some(mb) = self.default_memory_mb
            && mb == 0
        {
            tracing::warn!("default_memory_mb must be positive; ignoring");
            self.default_memory_mb = None;
        }
        if let Some(mb) = self.max_memory_mb
            && mb == 0
        {
            tracing::warn!("max_memory_mb must be positive; ignoring");
            self.max_memory_mb = None;
        }
        if self.default_memory_mb.is_none() && self.max_memory_mb.is_some() {
            tracing::warn!("max_memory_mb set without default_memory_mb; ignoring");
            self.max_memory_mb = None;
        }
        if let (Some(default), Some(max)) = (self.default_memory_mb, self.max_memory_mb)
            && default > max
        {
            tracing::warn!(default, max, "default_memory_mb exceeds max_memory_mb; clamping");
            self.default_memory_mb = Some(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.url_scheme, "https");
        assert_eq!(s.runner_port, 8000);
        assert_eq!(s.max_jobs, 8);
        assert!(!s.allow_custom_cpu());
    }

    #[test]
    fn parses_durations_from_yaml() {
        let s = Settings::from_yaml("deploy_domain: apps.example.com\ndeployment_timeout: 2m\n")
            .unwrap();
        assert_eq!(s.deploy_domain, "apps.example.com");
        assert_eq!(s.deployment_timeout, Duration::from_secs(120));
    }

    #[test]
    fn normalize_drops_ceiling_without_default() {
        let s = Settings::from_yaml("max_cpus: 4.0\n").unwrap();
        assert_eq!(s.max_cpus, None);
        assert!(!s.allow_custom_cpu());
    }

    #[test]
    fn normalize_clamps_default_above_ceiling() {
        let s = Settings::from_yaml("default_memory_mb: 4096\nmax_memory_mb: 2048\n").unwrap();
        assert_eq!(s.default_memory_mb, Some(2048));
        assert_eq!(s.max_memory_mb, Some(2048));
    }
}
