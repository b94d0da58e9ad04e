// ABOUTME: Alias and routing management: generated subdomains, rollback,
// ABOUTME: and the reverse proxy's dynamic configuration file.

mod alias;
mod traefik;

pub use alias::{
    AliasDomains, alias_domains, environment_subdomain, rollback, sanitize_branch, setup_aliases,
};
pub use traefik::{config_path, update_routing_config};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no alias found for subdomain: {0}")]
    AliasNotFound(String),

    #[error("no previous deployment to roll back to")]
    NoPreviousDeployment,

    /// Writing the routing config is non-fatal for an already-running
    /// deployment; callers log this instead of failing retroactively.
    #[error("failed to write routing config: {0}")]
    ConfigWrite(String),
}
