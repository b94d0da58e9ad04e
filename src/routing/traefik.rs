// ABOUTME: Generates the reverse proxy's dynamic routing config for a project.
// ABOUTME: Published atomically so the proxy's file watcher never sees a partial file.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::model::{AliasKind, DomainKind, Project};
use crate::settings::Settings;
use crate::store::Store;
use crate::types::DeploymentId;

use super::RoutingError;

#[derive(Debug, Serialize, PartialEq)]
struct RoutingConfig {
    http: HttpConfig,
}

#[derive(Debug, Serialize, PartialEq)]
struct HttpConfig {
    routers: BTreeMap<String, Router>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    middlewares: BTreeMap<String, Middleware>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Router {
    rule: String,
    service: String,
    #[serde(rename = "entryPoints")]
    entry_points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    middlewares: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<Tls>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Tls {
    #[serde(rename = "certResolver")]
    cert_resolver: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct Middleware {
    #[serde(rename = "redirectRegex")]
    redirect_regex: RedirectRegex,
}

#[derive(Debug, Serialize, PartialEq)]
struct RedirectRegex {
    regex: String,
    replacement: String,
    permanent: bool,
}

/// Path of the project's routing config file.
pub fn config_path(settings: &Settings, project: &Project) -> PathBuf {
    settings.traefik_dir.join(format!("project_{}.yml", project.id))
}

fn entry_points(settings: &Settings) -> Vec<String> {
    if settings.url_scheme == "https" {
        vec!["web".to_string(), "websecure".to_string()]
    } else {
        vec!["web".to_string()]
    }
}

fn tls(settings: &Settings, resolver: &str) -> Option<Tls> {
    (settings.url_scheme == "https").then(|| Tls {
        cert_resolver: resolver.to_string(),
    })
}

fn deployment_service(id: &DeploymentId) -> String {
    format!("deployment-{id}@docker")
}

/// Regenerate the project's routing config from its routable aliases and
/// active domains. `include_ids` covers deployments routed before their
/// conclusion is committed (the one currently finalizing). With nothing to
/// route, any existing config file is removed; otherwise the new config is
/// written to a temp file and atomically renamed over the final path.
pub fn update_routing_config(
    store: &Store,
    settings: &Settings,
    project: &Project,
    include_ids: &HashSet<DeploymentId>,
) -> Result<(), RoutingError> {
    let path = config_path(settings, project);

    let aliases = store.routable_aliases(&project.id, include_ids);
    let domains = store.active_domains(&project.id);

    let mut routers = BTreeMap::new();
    let mut middlewares = BTreeMap::new();

    for alias in &aliases {
        routers.insert(
            format!("router-alias-{}", alias.id),
            Router {
                rule: format!("Host(`{}.{}`)", alias.subdomain, settings.deploy_domain),
                service: deployment_service(&alias.deployment_id),
                entry_points: entry_points(settings),
                middlewares: None,
                tls: tls(settings, "le"),
            },
        );
    }

    for domain in &domains {
        // A domain routes through whichever alias currently serves its
        // environment's identifier subdomain.
        let Some(env_alias) = aliases.iter().find(|a| {
            a.kind == AliasKind::EnvironmentId && a.value == domain.environment_id.as_str()
        }) else {
            continue;
        };

        match &domain.kind {
            DomainKind::Route => {
                routers.insert(
                    format!("router-domain-{}", domain.id),
                    Router {
                        rule: format!("Host(`{}`)", domain.hostname),
                        service: deployment_service(&env_alias.deployment_id),
                        entry_points: entry_points(settings),
                        middlewares: None,
                        // HTTP-01 ACME challenge for custom domains
                        tls: tls(settings, "lehttp"),
                    },
                );
            }
            DomainKind::Redirect(code) => {
                let middleware_name = format!("redirect-{}", domain.id);
                routers.insert(
                    format!("router-redirect-{}", domain.id),
                    Router {
                        rule: format!("Host(`{}`)", domain.hostname),
                        service: "noop@internal".to_string(),
                        entry_points: entry_points(settings),
                        middlewares: Some(vec![middleware_name.clone()]),
                        tls: tls(settings, "lehttp"),
                    },
                );
                middlewares.insert(
                    middleware_name,
                    Middleware {
                        redirect_regex: RedirectRegex {
                            regex: format!("^https?://{}/(.*)", domain.hostname),
                            replacement: format!(
                                "https://{}.{}/$1",
                                env_alias.subdomain, settings.deploy_domain
                            ),
                            permanent: code.is_permanent(),
                        },
                    },
                );
            }
        }
    }

    // Nothing to route: make sure no stale config lingers.
    if routers.is_empty() && middlewares.is_empty() {
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| RoutingError::ConfigWrite(e.to_string()))?;
        }
        return Ok(());
    }

    let config = RoutingConfig {
        http: HttpConfig {
            routers,
            middlewares,
        },
    };

    std::fs::create_dir_all(&settings.traefik_dir)
        .map_err(|e| RoutingError::ConfigWrite(e.to_string()))?;

    let tmp = tempfile::NamedTempFile::new_in(&settings.traefik_dir)
        .map_err(|e| RoutingError::ConfigWrite(e.to_string()))?;
    serde_yaml::to_writer(tmp.as_file(), &config)
        .map_err(|e| RoutingError::ConfigWrite(e.to_string()))?;
    tmp.persist(&path)
        .map_err(|e| RoutingError::ConfigWrite(e.to_string()))?;

    Ok(())
}
