// ABOUTME: Record types the engine reads and mutates.
// ABOUTME: Deployments, aliases, domains, and collaborator-owned project inputs.

mod alias;
mod deployment;
mod domain;
mod project;

pub use alias::{Alias, AliasKind};
pub use deployment::{
    CommitMeta, Conclusion, ContainerStatus, Deployment, DeploymentError, DeploymentStatus,
    DeploymentUpdate, EnvVar, ExecutionSnapshot, ObservedState, ObservedStatus, Stage,
};
pub use domain::{Domain, DomainKind, DomainStatus, RedirectCode};
pub use project::{
    Environment, Project, ProjectConfig, ProjectStatus, Runner, StorageBinding, StorageKind,
};
