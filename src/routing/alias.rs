// ABOUTME: Subdomain derivation and alias maintenance for deployments.
// ABOUTME: Branch, environment, and environment-identifier aliases plus rollback.

use std::collections::HashSet;

use crate::events::{EventBus, EventKind};
use crate::model::{Alias, AliasKind, Deployment, Environment, Project};
use crate::settings::Settings;
use crate::store::{Store, StoreError};
use crate::types::PRODUCTION_ENVIRONMENT_ID;

use super::RoutingError;
use super::traefik::update_routing_config;

/// Sanitize a branch name into a DNS-safe label: everything outside
/// `[a-zA-Z0-9-]` becomes a hyphen, then lowercased. Returns `None` when
/// nothing survives.
pub fn sanitize_branch(branch: &str) -> Option<String> {
    let sanitized: String = branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>()
        .to_lowercase();

    if sanitized.chars().all(|c| c == '-') || sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// The canonical subdomain for an environment: the bare project slug for
/// production, `{project}-env-{slug}` otherwise.
pub fn environment_subdomain(project: &Project, environment: &Environment) -> String {
    if environment.id.as_str() == PRODUCTION_ENVIRONMENT_ID {
        project.slug.to_string()
    } else {
        format!("{}-env-{}", project.slug, environment.slug)
    }
}

/// The generated subdomains and URLs for a deployment. The
/// environment-identifier entries are always present; they survive
/// environment renames because they key on the id, not the slug.
#[derive(Debug, Clone, Default)]
pub struct AliasDomains {
    pub branch_subdomain: Option<String>,
    pub branch_domain: Option<String>,
    pub branch_url: Option<String>,
    pub environment_subdomain: Option<String>,
    pub environment_domain: Option<String>,
    pub environment_url: Option<String>,
    pub environment_id_subdomain: String,
    pub environment_id_domain: String,
    pub environment_id_url: String,
}

pub fn alias_domains(
    deployment: &Deployment,
    project: &Project,
    settings: &Settings,
) -> AliasDomains {
    let mut domains = AliasDomains::default();

    if let Some(branch) = sanitize_branch(&deployment.branch) {
        let subdomain = format!("{}-branch-{}", project.slug, branch);
        domains.branch_domain = Some(format!("{}.{}", subdomain, settings.deploy_domain));
        domains.branch_url = domains
            .branch_domain
            .as_ref()
            .map(|d| format!("{}://{}", settings.url_scheme, d));
        domains.branch_subdomain = Some(subdomain);
    }

    match project.environment(&deployment.environment_id) {
        Some(environment) => {
            let subdomain = environment_subdomain(project, environment);
            domains.environment_domain =
                Some(format!("{}.{}", subdomain, settings.deploy_domain));
            domains.environment_url = domains
                .environment_domain
                .as_ref()
                .map(|d| format!("{}://{}", settings.url_scheme, d));
            domains.environment_subdomain = Some(subdomain);
        }
        None => {
            tracing::warn!(
                environment_id = %deployment.environment_id,
                deployment_id = %deployment.id,
                "environment not found for deployment"
            );
        }
    }

    domains.environment_id_subdomain =
        format!("{}-env-id-{}", project.slug, deployment.environment_id);
    domains.environment_id_domain = format!(
        "{}.{}",
        domains.environment_id_subdomain, settings.deploy_domain
    );
    domains.environment_id_url = format!(
        "{}://{}",
        settings.url_scheme, domains.environment_id_domain
    );

    domains
}

/// Point the deployment's branch, environment, and environment-identifier
/// aliases at it. Each upsert is independent: a branch-alias failure must
/// not block the environment alias from being set, so failures are logged
/// and swallowed per alias.
pub fn setup_aliases(store: &Store, deployment: &Deployment, project: &Project, settings: &Settings) {
    let domains = alias_domains(deployment, project, settings);

    if let Some(subdomain) = &domains.branch_subdomain {
        store.upsert_alias(
            subdomain,
            deployment.id.clone(),
            AliasKind::Branch,
            &deployment.branch,
            None,
        );
    }

    if let Some(subdomain) = &domains.environment_subdomain {
        store.upsert_alias(
            subdomain,
            deployment.id.clone(),
            AliasKind::Environment,
            deployment.environment_id.as_str(),
            Some(deployment.environment_id.clone()),
        );
    }

    store.upsert_alias(
        &domains.environment_id_subdomain,
        deployment.id.clone(),
        AliasKind::EnvironmentId,
        deployment.environment_id.as_str(),
        Some(deployment.environment_id.clone()),
    );
}

/// Roll an environment back to its previous deployment: swap the canonical
/// alias's current/previous pair and republish the routing config. Swapping
/// twice restores the original state.
pub fn rollback(
    store: &Store,
    events: &EventBus,
    settings: &Settings,
    project: &Project,
    environment: &Environment,
) -> Result<Alias, RoutingError> {
    let subdomain = environment_subdomain(project, environment);

    let alias = match store.swap_alias(&subdomain) {
        Ok(alias) => alias,
        Err(StoreError::AliasNotFound(s)) => return Err(RoutingError::AliasNotFound(s)),
        Err(StoreError::NoPreviousDeployment) => {
            return Err(RoutingError::NoPreviousDeployment);
        }
        Err(e) => return Err(RoutingError::ConfigWrite(e.to_string())),
    };

    update_routing_config(store, settings, project, &HashSet::new())?;

    events.emit(
        &project.id,
        Some(&alias.deployment_id),
        Some(&environment.id),
        EventKind::DeploymentRollback {
            deployment_id: alias.deployment_id.clone(),
            previous_deployment_id: alias.previous_deployment_id.clone(),
        },
    );

    Ok(alias)
}
