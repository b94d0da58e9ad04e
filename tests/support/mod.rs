// ABOUTME: Shared test support: an in-memory fake runtime and fixture builders.
// ABOUTME: Lets scenario tests drive the engine without a container daemon.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use skiff::engine::{Engine, StaticCredentials};
use skiff::events::EventBus;
use skiff::jobs::{Job, JobQueue};
use skiff::model::{
    CommitMeta, Environment, Project, ProjectConfig, ProjectStatus, Runner,
};
use skiff::runtime::{
    ContainerConfig, ContainerError, ContainerFilters, ContainerInfo, ContainerOps,
    ContainerState, ContainerSummary, ImageError, ImageOps, NetworkAttachment, NetworkConfig,
    NetworkError, NetworkInspect, NetworkOps, RegistryAuth,
};
use skiff::settings::Settings;
use skiff::store::Store;
use skiff::types::{ContainerId, EnvironmentId, ImageRef, NetworkId, ProjectId, Slug, TeamId};

// =============================================================================
// Fake runtime
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
    /// network name -> ip address
    pub networks: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, HashSet<String>>,
    images: HashSet<String>,
    pulled: Vec<String>,
    seq: u64,
    container_ip: String,
    fail_next_create: Option<String>,
}

/// In-memory stand-in for the container runtime endpoint.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let runtime = Self::default();
        runtime.state.lock().container_ip = "172.18.0.2".to_string();
        runtime
    }

    /// IP assigned to containers on their networks from now on.
    pub fn set_container_ip(&self, ip: &str) {
        self.state.lock().container_ip = ip.to_string();
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().images.insert(image.to_string());
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state.lock().pulled.clone()
    }

    /// Make the next create_container call fail with this runtime message.
    pub fn fail_next_create(&self, message: &str) {
        self.state.lock().fail_next_create = Some(message.to_string());
    }

    pub fn container(&self, id: &ContainerId) -> Option<FakeContainer> {
        self.state.lock().containers.get(id.as_str()).cloned()
    }

    pub fn container_exists(&self, id: &ContainerId) -> bool {
        self.state.lock().containers.contains_key(id.as_str())
    }

    pub fn network_exists(&self, name: &str) -> bool {
        self.state.lock().networks.contains_key(name)
    }

    /// Flip a running container to exited with the given code, as if the
    /// process inside died.
    pub fn exit_container(&self, id: &ContainerId, code: i64) {
        let mut state = self.state.lock();
        if let Some(container) = state.containers.get_mut(id.as_str()) {
            container.state = ContainerState::Exited;
            container.exit_code = Some(code);
        }
    }

    /// Drop a container behind the engine's back, simulating out-of-band
    /// removal.
    pub fn vanish_container(&self, id: &ContainerId) {
        let mut state = self.state.lock();
        state.containers.remove(id.as_str());
        for members in state.networks.values_mut() {
            members.remove(id.as_str());
        }
    }

    /// Seed a container directly, e.g. one discovered only by label.
    pub fn seed_container(
        &self,
        id: &str,
        state_value: ContainerState,
        labels: HashMap<String, String>,
    ) {
        let mut state = self.state.lock();
        state.containers.insert(
            id.to_string(),
            FakeContainer {
                id: id.to_string(),
                name: format!("seeded-{id}"),
                state: state_value,
                exit_code: None,
                labels,
                networks: HashMap::new(),
            },
        );
    }
}

#[async_trait]
impl ImageOps for FakeRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        _auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let mut state = self.state.lock();
        state.images.insert(reference.to_string());
        state.pulled.push(reference.to_string());
        Ok(())
    }

    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError> {
        Ok(self.state.lock().images.contains(&reference.to_string()))
    }
}

#[async_trait]
impl ContainerOps for FakeRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_create.take() {
            return Err(ContainerError::Runtime(message));
        }

        state.seq += 1;
        let id = format!("ctr-{}", state.seq);
        let ip = state.container_ip.clone();

        let mut networks = HashMap::new();
        if let Some(network) = &config.network {
            networks.insert(network.clone(), ip);
            state
                .networks
                .entry(network.clone())
                .or_default()
                .insert(id.clone());
        }

        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: config.name.clone(),
                state: ContainerState::Created,
                exit_code: None,
                labels: config.labels.clone(),
                networks,
            },
        );

        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if container.state == ContainerState::Running {
            return Err(ContainerError::AlreadyRunning(id.to_string()));
        }
        container.state = ContainerState::Running;
        container.exit_code = None;
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if container.state != ContainerState::Running {
            return Err(ContainerError::NotRunning(id.to_string()));
        }
        container.state = ContainerState::Exited;
        container.exit_code = Some(0);
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, _force: bool) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.containers.remove(id.as_str()).is_none() {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        for members in state.networks.values_mut() {
            members.remove(id.as_str());
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        let state = self.state.lock();
        let container = state
            .containers
            .get(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;

        Ok(ContainerInfo {
            id: id.clone(),
            name: container.name.clone(),
            state: container.state,
            exit_code: container.exit_code,
            labels: container.labels.clone(),
            networks: container
                .networks
                .iter()
                .map(|(name, ip)| {
                    (
                        name.clone(),
                        NetworkAttachment {
                            ip_address: ip.clone(),
                        },
                    )
                })
                .collect(),
        })
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let state = self.state.lock();
        Ok(state
            .containers
            .values()
            .filter(|c| filters.all || c.state == ContainerState::Running)
            .filter(|c| {
                filters.labels.iter().all(|(key, value)| {
                    c.labels
                        .get(key)
                        .is_some_and(|v| value.is_empty() || v == value)
                })
            })
            .map(|c| ContainerSummary {
                id: ContainerId::new(c.id.clone()),
                name: c.name.clone(),
                state: format!("{:?}", c.state).to_lowercase(),
                labels: c.labels.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl NetworkOps for FakeRuntime {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError> {
        let mut state = self.state.lock();
        if state.networks.contains_key(&config.name) {
            return Err(NetworkError::AlreadyExists(config.name.clone()));
        }
        state.networks.insert(config.name.clone(), HashSet::new());
        Ok(NetworkId::new(config.name.clone()))
    }

    async fn remove_network(&self, name: &str) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        match state.networks.get(name) {
            None => Err(NetworkError::NotFound(name.to_string())),
            Some(members) if !members.is_empty() => Err(NetworkError::InUse(name.to_string())),
            Some(_) => {
                state.networks.remove(name);
                Ok(())
            }
        }
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkInspect, NetworkError> {
        let state = self.state.lock();
        let members = state
            .networks
            .get(name)
            .ok_or_else(|| NetworkError::NotFound(name.to_string()))?;
        Ok(NetworkInspect {
            id: NetworkId::new(name),
            name: name.to_string(),
            containers: members.iter().cloned().map(ContainerId::new).collect(),
        })
    }

    async fn connect_to_network(
        &self,
        container: &ContainerId,
        network: &str,
    ) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        let ip = state.container_ip.clone();
        let members = state
            .networks
            .get_mut(network)
            .ok_or_else(|| NetworkError::NotFound(network.to_string()))?;
        if !members.insert(container.to_string()) {
            return Err(NetworkError::AlreadyConnected(container.to_string()));
        }
        if let Some(entry) = state.containers.get_mut(container.as_str()) {
            entry.networks.insert(network.to_string(), ip);
        }
        Ok(())
    }

    async fn disconnect_from_network(
        &self,
        container: &ContainerId,
        network: &str,
        _force: bool,
    ) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        let members = state
            .networks
            .get_mut(network)
            .ok_or_else(|| NetworkError::NotFound(network.to_string()))?;
        if !members.remove(container.as_str()) {
            return Err(NetworkError::NotConnected(container.to_string()));
        }
        if let Some(entry) = state.containers.get_mut(container.as_str()) {
            entry.networks.remove(network);
        }
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn test_project() -> Project {
    Project {
        id: ProjectId::new("proj-1"),
        slug: Slug::new("myapp").unwrap(),
        team_id: TeamId::new("team-1"),
        status: ProjectStatus::Active,
        environments: vec![
            Environment {
                id: EnvironmentId::new("prod"),
                slug: "production".to_string(),
                branch: "main".to_string(),
                name: "Production".to_string(),
            },
            Environment {
                id: EnvironmentId::new("env-stg"),
                slug: "staging".to_string(),
                branch: "develop".to_string(),
                name: "Staging".to_string(),
            },
        ],
        config: ProjectConfig {
            runner: Some("python".to_string()),
            build_command: Some("pip install -r requirements.txt".to_string()),
            pre_deploy_command: None,
            start_command: Some("./serve".to_string()),
            root_directory: None,
            cpus: None,
            memory_mb: None,
            env_vars: vec![],
        },
    }
}

pub fn test_commit() -> CommitMeta {
    CommitMeta {
        author: "dev".to_string(),
        message: "ship it".to_string(),
        date: chrono::Utc::now(),
    }
}

pub fn test_settings(traefik_dir: std::path::PathBuf) -> Settings {
    Settings {
        url_scheme: "http".to_string(),
        deploy_domain: "apps.test".to_string(),
        traefik_dir,
        deployment_timeout: Duration::from_secs(60),
        container_delete_grace: Duration::from_millis(50),
        monitor_poll_interval: Duration::from_millis(20),
        reconcile_interval: Duration::from_secs(60),
        probe_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(1),
        runners: vec![Runner {
            slug: "python".to_string(),
            image: "runner-python".to_string(),
            enabled: true,
        }],
        ..Settings::default()
    }
}

/// Engine wired to a fake runtime, with its worker pool running.
pub fn test_engine(
    runtime: FakeRuntime,
    settings: Settings,
) -> Arc<Engine<FakeRuntime>> {
    let (jobs, job_rx) = JobQueue::new();
    let engine = Arc::new(Engine::new(
        Arc::new(settings),
        Arc::new(Store::new()),
        Arc::new(runtime),
        EventBus::default(),
        jobs,
        Arc::new(StaticCredentials("test-token".to_string())),
    ));
    engine.store.upsert_project(test_project());
    Arc::clone(&engine).run_workers(job_rx);
    engine
}

/// Engine without workers, for tests that drive job handling by hand.
pub fn test_engine_manual(
    runtime: FakeRuntime,
    settings: Settings,
) -> (Arc<Engine<FakeRuntime>>, tokio::sync::mpsc::UnboundedReceiver<Job>) {
    let (jobs, job_rx) = JobQueue::new();
    let engine = Arc::new(Engine::new(
        Arc::new(settings),
        Arc::new(Store::new()),
        Arc::new(runtime),
        EventBus::default(),
        jobs,
        Arc::new(StaticCredentials("test-token".to_string())),
    ));
    engine.store.upsert_project(test_project());
    (engine, job_rx)
}

/// Poll until the condition holds or the deadline passes.
pub async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Minimal HTTP server answering 200 to anything, for readiness probes.
/// Returns the bound port on 127.0.0.1.
pub async fn spawn_http_ok() -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            });
        }
    });
    port
}
