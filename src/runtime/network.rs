// ABOUTME: Network operations trait for the runtime driver.
// ABOUTME: Create and remove isolation networks, connect and disconnect containers.

use crate::types::{ContainerId, NetworkId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Configuration for creating a network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
    pub driver: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Inspection result for a network: identity plus attached container ids.
#[derive(Debug, Clone)]
pub struct NetworkInspect {
    pub id: NetworkId,
    pub name: String,
    pub containers: Vec<ContainerId>,
}

/// Network operations: create, inspect, connect, disconnect.
#[async_trait]
pub trait NetworkOps: Send + Sync {
    /// Create a network.
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError>;

    /// Remove a network.
    async fn remove_network(&self, name: &str) -> Result<(), NetworkError>;

    /// Inspect a network by name, including attached containers.
    async fn inspect_network(&self, name: &str) -> Result<NetworkInspect, NetworkError>;

    /// Connect a container to a network.
    async fn connect_to_network(
        &self,
        container: &ContainerId,
        network: &str,
    ) -> Result<(), NetworkError>;

    /// Disconnect a container from a network.
    async fn disconnect_from_network(
        &self,
        container: &ContainerId,
        network: &str,
        force: bool,
    ) -> Result<(), NetworkError>;
}

/// Errors from network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("network not found: {0}")]
    NotFound(String),

    #[error("network already exists: {0}")]
    AlreadyExists(String),

    #[error("container already connected: {0}")]
    AlreadyConnected(String),

    #[error("container not connected to network: {0}")]
    NotConnected(String),

    #[error("network in use, cannot remove: {0}")]
    InUse(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl NetworkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetworkError::NotFound(_))
    }
}
