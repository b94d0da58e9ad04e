// ABOUTME: In-process record store for deployments, aliases, domains, and project inputs.
// ABOUTME: Enforces the write-once conclusion invariant at the update boundary.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::model::{
    Alias, AliasKind, Conclusion, ContainerStatus, Deployment, DeploymentStatus, DeploymentUpdate,
    Domain, DomainStatus, ObservedStatus, Project, StorageBinding,
};
use crate::types::{AliasId, DeploymentId, EnvironmentId, ProjectId};

use super::StoreError;

/// Outcome of a status update. `applied` is false when the write-once
/// conclusion guard dropped status/conclusion/error changes.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub deployment: Deployment,
    pub applied: bool,
}

/// Observed-state write from the reconciliation sweep. Only ever touches
/// observed fields.
#[derive(Debug, Clone)]
pub struct ObservedUpdate {
    pub status: ObservedStatus,
    pub exit_code: Option<i64>,
    /// Whether the container was actually seen this tick. Seen containers
    /// refresh `last_seen_at` and reset the missing counter; unseen ones
    /// increment it.
    pub seen: bool,
}

#[derive(Default)]
struct Inner {
    projects: HashMap<ProjectId, Project>,
    deployments: HashMap<DeploymentId, Deployment>,
    aliases: HashMap<String, Alias>,
    domains: Vec<Domain>,
    storage_bindings: Vec<StorageBinding>,
    alias_seq: u64,
}

/// The engine's record store. The platform's relational database is an
/// external collaborator; this in-process store carries the records the
/// engine itself mutates, behind an API a database-backed implementation
/// could replace.
#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Collaborator inputs
    // -------------------------------------------------------------------------

    pub fn upsert_project(&self, project: Project) {
        self.inner
            .write()
            .projects
            .insert(project.id.clone(), project);
    }

    pub fn project(&self, id: &ProjectId) -> Option<Project> {
        self.inner.read().projects.get(id).cloned()
    }

    pub fn insert_domain(&self, domain: Domain) {
        self.inner.write().domains.push(domain);
    }

    pub fn active_domains(&self, project_id: &ProjectId) -> Vec<Domain> {
        self.inner
            .read()
            .domains
            .iter()
            .filter(|d| &d.project_id == project_id && d.status == DomainStatus::Active)
            .cloned()
            .collect()
    }

    pub fn insert_storage_binding(&self, binding: StorageBinding) {
        self.inner.write().storage_bindings.push(binding);
    }

    pub fn storage_bindings(
        &self,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
    ) -> Vec<StorageBinding> {
        self.inner
            .read()
            .storage_bindings
            .iter()
            .filter(|b| &b.project_id == project_id && b.applies_to(environment_id))
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Deployments
    // -------------------------------------------------------------------------

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.inner
            .write()
            .deployments
            .insert(deployment.id.clone(), deployment);
    }

    pub fn deployment(&self, id: &DeploymentId) -> Result<Deployment, StoreError> {
        self.inner
            .read()
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::DeploymentNotFound(id.clone()))
    }

    /// Apply a partial update. Once a conclusion is set, further changes to
    /// status, conclusion, and error are dropped (and `applied` reports it);
    /// container bookkeeping fields stay writable so cleanup can record what
    /// it did.
    pub fn update_deployment(
        &self,
        id: &DeploymentId,
        update: DeploymentUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut inner = self.inner.write();
        let deployment = inner
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::DeploymentNotFound(id.clone()))?;

        let mut applied = true;
        let concluded = deployment.conclusion.is_some();
        if concluded
            && (update.status.is_some() || update.conclusion.is_some() || update.error.is_some())
        {
            tracing::warn!(
                deployment_id = %id,
                "ignoring lifecycle update for already-concluded deployment"
            );
            applied = false;
        } else {
            if let Some(status) = update.status {
                deployment.status = status;
            }
            if let Some(conclusion) = update.conclusion {
                deployment.conclusion = Some(conclusion);
                deployment.concluded_at = Some(Utc::now());
            }
            if update.error.is_some() {
                deployment.error = update.error;
            }
        }

        if let Some(container_id) = update.container_id {
            deployment.container_id = Some(container_id);
        }
        if let Some(container_status) = update.container_status {
            deployment.container_status = Some(container_status);
        }
        if let Some(job_id) = update.job_id {
            deployment.job_id = Some(job_id);
        }

        Ok(UpdateOutcome {
            deployment: deployment.clone(),
            applied,
        })
    }

    /// Record what the reconciliation sweep observed. Returns the updated
    /// record plus whether any observed field changed, so callers can bound
    /// event volume.
    pub fn apply_observed(
        &self,
        id: &DeploymentId,
        update: ObservedUpdate,
    ) -> Result<(Deployment, bool), StoreError> {
        let mut inner = self.inner.write();
        let deployment = inner
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::DeploymentNotFound(id.clone()))?;

        let before = deployment.observed.clone();
        let now = Utc::now();

        deployment.observed.status = Some(update.status);
        deployment.observed.observed_at = Some(now);
        if update.seen {
            deployment.observed.exit_code = update.exit_code;
            deployment.observed.last_seen_at = Some(now);
            deployment.observed.missing_count = 0;
        } else {
            deployment.observed.missing_count = before.missing_count.saturating_add(1);
        }

        let changed = before.status != deployment.observed.status
            || before.exit_code != deployment.observed.exit_code
            || before.missing_count != deployment.observed.missing_count;

        Ok((deployment.clone(), changed))
    }

    /// Deployments the readiness monitor should probe this tick.
    pub fn deployments_awaiting_readiness(&self) -> Vec<Deployment> {
        self.inner
            .read()
            .deployments
            .values()
            .filter(|d| {
                d.status == DeploymentStatus::Deploy
                    && d.container_status == Some(ContainerStatus::Running)
            })
            .cloned()
            .collect()
    }

    /// Reconciliation candidates: an explicit id list, or every deployment
    /// whose container may still exist.
    pub fn reconcile_candidates(&self, ids: Option<&[DeploymentId]>) -> Vec<Deployment> {
        let inner = self.inner.read();
        match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| inner.deployments.get(id).cloned())
                .collect(),
            None => inner
                .deployments
                .values()
                .filter(|d| {
                    matches!(
                        d.container_status,
                        Some(ContainerStatus::Running) | Some(ContainerStatus::Stopped)
                    ) || d.observed.status == Some(ObservedStatus::Running)
                })
                .cloned()
                .collect(),
        }
    }

    /// Completed deployments of a project whose container still runs but is
    /// no longer referenced by any alias.
    pub fn inactive_deployments(
        &self,
        project_id: &ProjectId,
        referenced: &HashSet<DeploymentId>,
    ) -> Vec<Deployment> {
        self.inner
            .read()
            .deployments
            .values()
            .filter(|d| {
                &d.project_id == project_id
                    && d.container_id.is_some()
                    && d.container_status == Some(ContainerStatus::Running)
                    && d.status == DeploymentStatus::Completed
                    && !referenced.contains(&d.id)
            })
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Aliases
    // -------------------------------------------------------------------------

    /// Upsert by subdomain. When the pointed-at deployment changes, the old
    /// one shifts into `previous_deployment_id` to keep the rollback target.
    pub fn upsert_alias(
        &self,
        subdomain: &str,
        deployment_id: DeploymentId,
        kind: AliasKind,
        value: &str,
        environment_id: Option<EnvironmentId>,
    ) -> Alias {
        let mut inner = self.inner.write();
        if let Some(alias) = inner.aliases.get_mut(subdomain) {
            if alias.deployment_id != deployment_id {
                alias.previous_deployment_id = Some(alias.deployment_id.clone());
                alias.deployment_id = deployment_id;
            }
            alias.kind = kind;
            alias.value = value.to_string();
            alias.environment_id = environment_id;
            return alias.clone();
        }

        inner.alias_seq += 1;
        let alias = Alias {
            id: AliasId::new(format!("alias-{}", inner.alias_seq)),
            subdomain: subdomain.to_string(),
            deployment_id,
            previous_deployment_id: None,
            kind,
            value: value.to_string(),
            environment_id,
        };
        inner.aliases.insert(subdomain.to_string(), alias.clone());
        alias
    }

    pub fn alias_by_subdomain(&self, subdomain: &str) -> Option<Alias> {
        self.inner.read().aliases.get(subdomain).cloned()
    }

    /// Swap an alias's current and previous deployments. Calling this twice
    /// restores the original pair.
    pub fn swap_alias(&self, subdomain: &str) -> Result<Alias, StoreError> {
        let mut inner = self.inner.write();
        let alias = inner
            .aliases
            .get_mut(subdomain)
            .ok_or_else(|| StoreError::AliasNotFound(subdomain.to_string()))?;

        let previous = alias
            .previous_deployment_id
            .take()
            .ok_or(StoreError::NoPreviousDeployment)?;
        alias.previous_deployment_id = Some(std::mem::replace(&mut alias.deployment_id, previous));

        Ok(alias.clone())
    }

    /// Aliases of a project whose deployment concluded successfully, plus
    /// aliases pointing at any explicitly included deployment (so the
    /// deployment currently finalizing routes before its conclusion commits).
    pub fn routable_aliases(
        &self,
        project_id: &ProjectId,
        include_ids: &HashSet<DeploymentId>,
    ) -> Vec<Alias> {
        let inner = self.inner.read();
        inner
            .aliases
            .values()
            .filter(|alias| {
                let Some(deployment) = inner.deployments.get(&alias.deployment_id) else {
                    return false;
                };
                &deployment.project_id == project_id
                    && (deployment.conclusion == Some(Conclusion::Succeeded)
                        || include_ids.contains(&deployment.id))
            })
            .cloned()
            .collect()
    }

    /// Deployment ids still referenced by any alias, current or previous.
    /// These may still be rolled back to and must keep their containers.
    pub fn alias_referenced_deployments(&self, project_id: &ProjectId) -> HashSet<DeploymentId> {
        let inner = self.inner.read();
        let mut referenced = HashSet::new();
        for alias in inner.aliases.values() {
            for id in std::iter::once(&alias.deployment_id)
                .chain(alias.previous_deployment_id.iter())
            {
                if inner
                    .deployments
                    .get(id)
                    .is_some_and(|d| &d.project_id == project_id)
                {
                    referenced.insert(id.clone());
                }
            }
        }
        referenced
    }
}
