// ABOUTME: Phantom-typed identifiers for compile-time type safety.
// ABOUTME: Prevents accidental swapping of deployment, project, container, and network IDs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker types for phantom type parameters.
/// Using empty enums prevents instantiation and requires no trait bounds.
pub enum DeploymentMarker {}
pub enum ProjectMarker {}
pub enum EnvironmentMarker {}
pub enum TeamMarker {}
pub enum AliasMarker {}
pub enum DomainMarker {}
pub enum ContainerMarker {}
pub enum NetworkMarker {}
pub enum JobMarker {}

/// A type-safe identifier that prevents accidental mixing of different ID types.
///
/// Using phantom types, this ensures you can't accidentally pass a `DeploymentId`
/// where a `ProjectId` is expected, catching bugs at compile time.
#[must_use = "IDs reference resources and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }

    /// First seven characters, for container names and log prefixes.
    pub fn short(&self) -> &str {
        let end = self.value.len().min(7);
        &self.value[..end]
    }
}

// Manual trait implementations that don't require T to implement the trait.
// This is necessary because T is only used as a phantom type marker.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Id").field("value", &self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

pub type DeploymentId = Id<DeploymentMarker>;
pub type ProjectId = Id<ProjectMarker>;
pub type EnvironmentId = Id<EnvironmentMarker>;
pub type TeamId = Id<TeamMarker>;
pub type AliasId = Id<AliasMarker>;
pub type DomainId = Id<DomainMarker>;
pub type ContainerId = Id<ContainerMarker>;
pub type NetworkId = Id<NetworkMarker>;
pub type JobId = Id<JobMarker>;

/// Reserved environment id for the production environment. The production
/// environment serves the bare project subdomain instead of a suffixed one.
pub const PRODUCTION_ENVIRONMENT_ID: &str = "prod";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_truncates_to_seven_chars() {
        let id = DeploymentId::new("abcdefghij");
        assert_eq!(id.short(), "abcdefg");
    }

    #[test]
    fn short_handles_short_ids() {
        let id = DeploymentId::new("abc");
        assert_eq!(id.short(), "abc");
    }
}
