// ABOUTME: The Deployment record: one attempt to run a specific commit in an environment.
// ABOUTME: Lifecycle status, terminal conclusion, container bookkeeping, and observed state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ContainerId, DeploymentId, EnvironmentId, ImageRef, JobId, ProjectId};

/// Lifecycle stage of a deployment. `Completed` is terminal and carries a
/// [`Conclusion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Prepare,
    Deploy,
    Finalize,
    Fail,
    Completed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Prepare => "prepare",
            DeploymentStatus::Deploy => "deploy",
            DeploymentStatus::Finalize => "finalize",
            DeploymentStatus::Fail => "fail",
            DeploymentStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Permanent terminal outcome of a deployment. Set at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conclusion {
    Succeeded,
    Failed,
    Canceled,
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Conclusion::Succeeded => "succeeded",
            Conclusion::Failed => "failed",
            Conclusion::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// Authoritative record of the deployment's container, as last written by
/// the lifecycle paths (not by reconciliation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Removed,
}

/// Container truth as last seen by the reconciliation sweep. Distinct from
/// [`ContainerStatus`]: reconciliation only ever writes observed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedStatus {
    Running,
    Exited,
    Dead,
    Paused,
    NotFound,
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObservedStatus::Running => "running",
            ObservedStatus::Exited => "exited",
            ObservedStatus::Dead => "dead",
            ObservedStatus::Paused => "paused",
            ObservedStatus::NotFound => "not_found",
        };
        write!(f, "{s}")
    }
}

/// The stage a failure originated from, stored alongside the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prepare,
    Deploy,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Prepare => "prepare",
            Stage::Deploy => "deploy",
            Stage::Finalize => "finalize",
        };
        write!(f, "{s}")
    }
}

/// Human-readable failure stored on the deployment. This is the user-visible
/// surface; stack traces never leave the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentError {
    pub stage: Stage,
    pub message: String,
}

/// Commit metadata captured from the trigger payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub author: String,
    pub message: String,
    pub date: DateTime<Utc>,
}

/// One user-declared environment variable from the project config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Build/run configuration frozen at deployment creation. Later edits to the
/// project config do not affect deployments already created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub build_command: Option<String>,
    pub pre_deploy_command: Option<String>,
    pub start_command: String,
    pub root_directory: Option<String>,
    pub runner: String,
    pub image: ImageRef,
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
    pub env_vars: Vec<EnvVar>,
}

/// Fields written only by the reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub status: Option<ObservedStatus>,
    pub exit_code: Option<i64>,
    pub observed_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Consecutive reconciliation ticks the container could not be found.
    /// Resets to 0 the moment it is found again.
    pub missing_count: u32,
}

/// One attempt to run a specific commit in a specific environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub branch: String,
    pub commit_sha: String,
    pub commit: CommitMeta,
    pub repo_full_name: String,
    pub snapshot: ExecutionSnapshot,

    pub status: DeploymentStatus,
    pub conclusion: Option<Conclusion>,
    pub error: Option<DeploymentError>,
    pub container_id: Option<ContainerId>,
    pub container_status: Option<ContainerStatus>,
    pub job_id: Option<JobId>,

    pub observed: ObservedState,

    pub created_at: DateTime<Utc>,
    pub concluded_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// A freshly triggered deployment, queued for the coordinator.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DeploymentId,
        project_id: ProjectId,
        environment_id: EnvironmentId,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
        commit: CommitMeta,
        repo_full_name: impl Into<String>,
        snapshot: ExecutionSnapshot,
    ) -> Self {
        Self {
            id,
            project_id,
            environment_id,
            branch: branch.into(),
            commit_sha: commit_sha.into(),
            commit,
            repo_full_name: repo_full_name.into(),
            snapshot,
            status: DeploymentStatus::Prepare,
            conclusion: None,
            error: None,
            container_id: None,
            container_status: None,
            job_id: None,
            observed: ObservedState::default(),
            created_at: Utc::now(),
            concluded_at: None,
        }
    }

    /// Whether the deployment has reached its permanent terminal outcome.
    pub fn is_concluded(&self) -> bool {
        self.conclusion.is_some()
    }

    /// Whether the container is believed live enough to be worth stopping.
    pub fn container_needs_stop(&self) -> bool {
        self.container_id.is_some()
            && !matches!(
                self.container_status,
                Some(ContainerStatus::Stopped) | Some(ContainerStatus::Removed)
            )
    }

    /// Wall-clock age since creation.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Partial update applied through the store. Mirrors the fields the
/// lifecycle paths are allowed to touch; observed fields have their own
/// update type.
#[derive(Debug, Clone, Default)]
pub struct DeploymentUpdate {
    pub status: Option<DeploymentStatus>,
    pub conclusion: Option<Conclusion>,
    pub error: Option<DeploymentError>,
    pub container_id: Option<ContainerId>,
    pub container_status: Option<ContainerStatus>,
    pub job_id: Option<JobId>,
}
