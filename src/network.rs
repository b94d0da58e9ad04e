// ABOUTME: Idempotent helpers for per-environment isolation networks.
// ABOUTME: Ensure, connect, detach, and remove networks as deployments come and go.

use std::collections::HashMap;

use crate::labels;
use crate::runtime::{ContainerOps, NetworkConfig, NetworkError, NetworkOps};
use crate::types::{ContainerId, EnvironmentId, NetworkId, ProjectId};

/// Prefix for isolation networks the engine owns. The probe-detach sweep
/// only ever touches networks under this prefix.
pub const WORKSPACE_NETWORK_PREFIX: &str = "skiff_workspace_";

/// Name of the isolation network for one environment of one project.
pub fn workspace_network_name(project_id: &ProjectId, environment_id: &EnvironmentId) -> String {
    format!("{WORKSPACE_NETWORK_PREFIX}{project_id}_{environment_id}")
}

/// Create the network if absent. Tolerates the create racing another
/// caller: "already exists" is success.
pub async fn ensure_network<R: NetworkOps>(
    runtime: &R,
    name: &str,
    labels: HashMap<String, String>,
) -> Result<NetworkId, NetworkError> {
    if let Ok(existing) = runtime.inspect_network(name).await {
        return Ok(existing.id);
    }

    let config = NetworkConfig {
        name: name.to_string(),
        driver: Some("bridge".to_string()),
        labels,
    };

    match runtime.create_network(&config).await {
        Ok(id) => Ok(id),
        Err(NetworkError::AlreadyExists(_)) => Ok(NetworkId::new(name)),
        Err(e) => Err(e),
    }
}

/// Attach a container, treating "already connected" as success.
pub async fn ensure_connected<R: NetworkOps>(
    runtime: &R,
    container: &ContainerId,
    network: &str,
) -> Result<(), NetworkError> {
    match runtime.connect_to_network(container, network).await {
        Ok(()) => Ok(()),
        Err(NetworkError::AlreadyConnected(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Detach a container, treating "already gone" as success.
pub async fn ensure_disconnected<R: NetworkOps>(
    runtime: &R,
    container: &ContainerId,
    network: &str,
) -> Result<(), NetworkError> {
    match runtime
        .disconnect_from_network(container, network, true)
        .await
    {
        Ok(()) => Ok(()),
        Err(NetworkError::NotFound(_)) | Err(NetworkError::NotConnected(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Whether any container attached to the network carries the deployment
/// label, i.e. the network still serves a live deployment.
pub async fn has_live_deployments<R: NetworkOps + ContainerOps>(
    runtime: &R,
    name: &str,
) -> Result<bool, NetworkError> {
    let inspect = match runtime.inspect_network(name).await {
        Ok(inspect) => inspect,
        Err(NetworkError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };

    for container_id in &inspect.containers {
        let Ok(info) = runtime.inspect_container(container_id).await else {
            continue;
        };
        if info.labels.contains_key(labels::DEPLOYMENT_ID) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Remove a network only when nothing is attached to it anymore.
pub async fn remove_if_empty<R: NetworkOps>(runtime: &R, name: &str) {
    let inspect = match runtime.inspect_network(name).await {
        Ok(inspect) => inspect,
        Err(_) => return,
    };

    if !inspect.containers.is_empty() {
        return;
    }

    if let Err(e) = runtime.remove_network(name).await
        && !e.is_not_found()
    {
        tracing::debug!(network = name, error = %e, "could not remove empty network");
    }
}

/// Detach the probe container from every workspace network that no longer
/// has live deployment containers, removing networks left completely empty.
/// Best-effort throughout.
pub async fn detach_probe_from_unused_networks<R: NetworkOps + ContainerOps>(
    runtime: &R,
    probe: &ContainerId,
) {
    let info = match runtime.inspect_container(probe).await {
        Ok(info) => info,
        Err(_) => return,
    };

    for network_name in info.networks.keys() {
        if !network_name.starts_with(WORKSPACE_NETWORK_PREFIX) {
            continue;
        }
        match has_live_deployments(runtime, network_name).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(network = %network_name, error = %e, "could not inspect network");
                continue;
            }
        }

        if let Err(e) = ensure_disconnected(runtime, probe, network_name).await {
            tracing::warn!(network = %network_name, error = %e, "failed to detach probe");
            continue;
        }

        remove_if_empty(runtime, network_name).await;
    }
}
