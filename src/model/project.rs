// ABOUTME: Collaborator-owned records the engine consumes: projects, environments,
// ABOUTME: runner catalog entries, and storage associations yielding bind mounts.

use serde::{Deserialize, Serialize};

use crate::types::{EnvironmentId, ProjectId, Slug, TeamId};

/// A named deployment target within a project, bound to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub slug: String,
    pub branch: String,
    pub name: String,
}

/// Loosely-typed project configuration, validated once at the boundary into
/// explicit optional fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub runner: Option<String>,
    pub build_command: Option<String>,
    pub pre_deploy_command: Option<String>,
    pub start_command: Option<String>,
    pub root_directory: Option<String>,
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub env_vars: Vec<crate::model::EnvVar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Deleted,
}

/// Project record as exposed by the platform's storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub slug: Slug,
    pub team_id: TeamId,
    pub status: ProjectStatus,
    pub environments: Vec<Environment>,
    pub config: ProjectConfig,
}

impl Project {
    pub fn environment(&self, id: &EnvironmentId) -> Option<&Environment> {
        self.environments.iter().find(|e| &e.id == id)
    }

    /// Resolve the environment whose branch matches the pushed branch.
    pub fn environment_for_branch(&self, branch: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.branch == branch)
    }
}

/// A runner catalog entry. The catalog itself is loaded by a collaborator
/// and carried in settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    pub slug: String,
    pub image: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Database,
    Volume,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Database => "database",
            StorageKind::Volume => "volume",
        }
    }
}

/// A storage resource associated with a project, mounted into deployment
/// containers. An empty `environment_ids` list applies to every environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBinding {
    pub project_id: ProjectId,
    pub team_id: TeamId,
    pub kind: StorageKind,
    pub name: String,
    #[serde(default)]
    pub environment_ids: Vec<EnvironmentId>,
}

impl StorageBinding {
    pub fn applies_to(&self, environment_id: &EnvironmentId) -> bool {
        self.environment_ids.is_empty() || self.environment_ids.contains(environment_id)
    }
}
