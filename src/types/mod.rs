// ABOUTME: Core domain types shared across the engine.
// ABOUTME: Phantom-typed IDs, project slugs, and image references.

mod id;
mod image_ref;
mod slug;

pub use id::{
    AliasId, ContainerId, DeploymentId, DomainId, EnvironmentId, Id, JobId, NetworkId,
    PRODUCTION_ENVIRONMENT_ID, ProjectId, TeamId,
};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use slug::{Slug, SlugError};
