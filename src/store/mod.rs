// ABOUTME: Record store for the engine's mutable state.
// ABOUTME: In-process implementation; the platform database is an external collaborator.

mod memory;

pub use memory::{ObservedUpdate, Store, UpdateOutcome};

use crate::types::DeploymentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("no alias found for subdomain: {0}")]
    AliasNotFound(String),

    #[error("no previous deployment to roll back to")]
    NoPreviousDeployment,
}
