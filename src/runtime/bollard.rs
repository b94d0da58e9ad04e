// ABOUTME: Bollard-based container runtime driver.
// ABOUTME: Talks to a single Docker-compatible endpoint over unix socket or TCP.

use crate::runtime::container::{ContainerError, ContainerFilters, ContainerOps};
use crate::runtime::image::{ImageError, ImageOps, RegistryAuth};
use crate::runtime::network::{NetworkConfig, NetworkError, NetworkInspect, NetworkOps};
use crate::runtime::shared_types::{
    ContainerConfig, ContainerInfo, ContainerState, ContainerSummary, NetworkAttachment,
};
use crate::types::{ContainerId, ImageRef, NetworkId};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig, Mount, MountTypeEnum};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// CPU period used when translating fractional cores into quota/period.
const CPU_PERIOD_MICROS: i64 = 100_000;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_image_pull_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    ImageError::PullFailed(format!("{}: {}", image_name, e))
}

fn map_container_create_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::ImageNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => ContainerError::AlreadyExists(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_start_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 304 => ContainerError::AlreadyRunning(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_stop_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 304 => ContainerError::NotRunning(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_not_found_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_network_create_error(e: bollard::errors::Error) -> NetworkError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => NetworkError::AlreadyExists(message.clone()),
        _ => NetworkError::Runtime(e.to_string()),
    }
}

fn map_network_remove_error(e: bollard::errors::Error) -> NetworkError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => NetworkError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 403 => NetworkError::InUse(message.clone()),
        _ => NetworkError::Runtime(e.to_string()),
    }
}

fn map_network_connect_error(e: bollard::errors::Error) -> NetworkError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => NetworkError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => NetworkError::AlreadyConnected(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 403 && message.to_lowercase().contains("endpoint with name") => {
            NetworkError::AlreadyConnected(message.clone())
        }
        _ => NetworkError::Runtime(e.to_string()),
    }
}

fn map_network_disconnect_error(e: bollard::errors::Error) -> NetworkError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => NetworkError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 403 => NetworkError::NotConnected(message.clone()),
        _ => NetworkError::Runtime(e.to_string()),
    }
}

// =============================================================================
// BollardRuntime
// =============================================================================

/// Container runtime driver backed by bollard against a single endpoint.
pub struct BollardRuntime {
    client: Docker,
}

impl BollardRuntime {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    /// Connect to the endpoint named in settings: `unix://` socket path or
    /// an http/tcp address.
    pub fn connect(docker_host: &str) -> Result<Self, bollard::errors::Error> {
        let client = if let Some(path) = docker_host.strip_prefix("unix://") {
            Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_http(docker_host, 120, bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageOps for BollardRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let image_name = reference.to_string();

        let opts = CreateImageOptions {
            from_image: Some(image_name.clone()),
            ..Default::default()
        };

        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username.clone()),
            password: Some(a.password.clone()),
            serveraddress: a.server.clone(),
            ..Default::default()
        });

        // Pull returns a stream of progress updates - consume it
        let mut stream = self.client.create_image(Some(opts), None, credentials);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| map_image_pull_error(e, &image_name))?;
            if let Some(status) = info.status {
                tracing::debug!(image = %image_name, "{status}");
            }
        }

        Ok(())
    }

    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError> {
        let image_name = reference.to_string();

        match self.client.inspect_image(&image_name).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ImageError::Runtime(format!(
                "failed to inspect {}: {}",
                image_name, e
            ))),
        }
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut host_config = HostConfig {
            security_opt: if config.security_opt.is_empty() {
                None
            } else {
                Some(config.security_opt.clone())
            },
            ..Default::default()
        };

        // Translate declared resources: fractional cores -> quota/period,
        // megabytes -> bytes.
        if let Some(resources) = &config.resources {
            if let Some(cpus) = resources.cpus
                && cpus > 0.0
            {
                host_config.cpu_quota = Some((cpus * CPU_PERIOD_MICROS as f64) as i64);
                host_config.cpu_period = Some(CPU_PERIOD_MICROS);
            }
            if let Some(memory_mb) = resources.memory_mb
                && memory_mb > 0
            {
                host_config.memory = Some((memory_mb * 1024 * 1024) as i64);
            }
        }

        let mounts: Vec<Mount> = config
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();
        if !mounts.is_empty() {
            host_config.mounts = Some(mounts);
        }

        if let Some(log_config) = &config.log_config {
            host_config.log_config = Some(bollard::models::HostConfigLogConfig {
                typ: Some(log_config.driver.clone()),
                config: Some(log_config.options.clone()),
            });
        }

        // Attach to the isolation network at creation
        let networking_config = config.network.as_ref().map(|network| {
            let mut endpoints: HashMap<String, bollard::models::EndpointSettings> = HashMap::new();
            endpoints.insert(network.clone(), bollard::models::EndpointSettings::default());
            bollard::models::NetworkingConfig {
                endpoints_config: Some(endpoints),
            }
        });

        let container_config = ContainerCreateBody {
            image: Some(config.image.to_string()),
            cmd: Some(config.command.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            working_dir: config.working_dir.clone(),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), container_config)
            .await
            .map_err(map_container_create_error)?;

        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(
                id.as_str(),
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(map_container_start_error)
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            signal: None,
        };

        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_stop_error)
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_not_found_error)?;

        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_container_not_found_error)?;

        let state = details
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| match s {
                bollard::models::ContainerStateStatusEnum::CREATED => ContainerState::Created,
                bollard::models::ContainerStateStatusEnum::RUNNING => ContainerState::Running,
                bollard::models::ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
                bollard::models::ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
                bollard::models::ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
                bollard::models::ContainerStateStatusEnum::EXITED => ContainerState::Exited,
                bollard::models::ContainerStateStatusEnum::DEAD => ContainerState::Dead,
                _ => ContainerState::Exited,
            })
            .unwrap_or(ContainerState::Exited);

        let exit_code = details.state.as_ref().and_then(|s| s.exit_code);

        let mut networks = HashMap::new();
        if let Some(ref network_settings) = details.network_settings
            && let Some(ref nets) = network_settings.networks
        {
            for (name, endpoint) in nets {
                networks.insert(
                    name.clone(),
                    NetworkAttachment {
                        ip_address: endpoint.ip_address.clone().unwrap_or_default(),
                    },
                );
            }
        }

        Ok(ContainerInfo {
            id: id.clone(),
            name: details
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            state,
            exit_code,
            labels: details.config.and_then(|c| c.labels).unwrap_or_default(),
            networks,
        })
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();

        for (key, value) in &filters.labels {
            let entry = if value.is_empty() {
                key.clone()
            } else {
                format!("{}={}", key, value)
            };
            filter_map
                .entry("label".to_string())
                .or_default()
                .push(entry);
        }

        let opts = ListContainersOptions {
            all: filters.all,
            filters: Some(filter_map),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(|e| ContainerError::Runtime(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let id = c.id.unwrap_or_default();
                let names = c.names.unwrap_or_default();
                let name = names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();

                let state = c
                    .state
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .unwrap_or_default();

                ContainerSummary {
                    id: ContainerId::new(id),
                    name,
                    state,
                    labels: c.labels.unwrap_or_default(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl NetworkOps for BollardRuntime {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError> {
        let opts = bollard::models::NetworkCreateRequest {
            name: config.name.clone(),
            driver: config.driver.clone(),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            ..Default::default()
        };

        let response = self
            .client
            .create_network(opts)
            .await
            .map_err(map_network_create_error)?;

        Ok(NetworkId::new(response.id))
    }

    async fn remove_network(&self, name: &str) -> Result<(), NetworkError> {
        self.client
            .remove_network(name)
            .await
            .map_err(map_network_remove_error)
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkInspect, NetworkError> {
        let network = self
            .client
            .inspect_network(
                name,
                None::<bollard::query_parameters::InspectNetworkOptions>,
            )
            .await
            .map_err(|e| match &e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => NetworkError::NotFound(message.clone()),
                _ => NetworkError::Runtime(e.to_string()),
            })?;

        Ok(NetworkInspect {
            id: NetworkId::new(network.id.unwrap_or_default()),
            name: network.name.unwrap_or_else(|| name.to_string()),
            containers: network
                .containers
                .unwrap_or_default()
                .into_keys()
                .map(ContainerId::new)
                .collect(),
        })
    }

    async fn connect_to_network(
        &self,
        container: &ContainerId,
        network: &str,
    ) -> Result<(), NetworkError> {
        let config = bollard::models::NetworkConnectRequest {
            container: container.to_string(),
            endpoint_config: None,
        };

        self.client
            .connect_network(network, config)
            .await
            .map_err(map_network_connect_error)
    }

    async fn disconnect_from_network(
        &self,
        container: &ContainerId,
        network: &str,
        force: bool,
    ) -> Result<(), NetworkError> {
        let config = bollard::models::NetworkDisconnectRequest {
            container: container.to_string(),
            force: Some(force),
        };

        self.client
            .disconnect_network(network, config)
            .await
            .map_err(map_network_disconnect_error)
    }
}
