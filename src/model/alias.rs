// ABOUTME: The Alias record: a generated subdomain mapped to the deployment serving it.
// ABOUTME: Keeps exactly one level of history so an environment can be rolled back.

use serde::{Deserialize, Serialize};

use crate::types::{AliasId, DeploymentId, EnvironmentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    /// `{project}-branch-{branch}` — follows a branch.
    Branch,
    /// `{project}` or `{project}-env-{slug}` — the environment's canonical host.
    Environment,
    /// `{project}-env-id-{id}` — keyed by environment id, survives renames.
    EnvironmentId,
}

/// A mapping from a generated subdomain to the deployment currently serving
/// it. At most one alias exists per subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub id: AliasId,
    pub subdomain: String,
    pub deployment_id: DeploymentId,
    /// The previously served deployment, kept for rollback. Swapping
    /// `deployment_id` and `previous_deployment_id` twice restores the
    /// original pair.
    pub previous_deployment_id: Option<DeploymentId>,
    pub kind: AliasKind,
    pub value: String,
    pub environment_id: Option<EnvironmentId>,
}
