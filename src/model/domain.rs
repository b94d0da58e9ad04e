// ABOUTME: The Domain record: a user-supplied hostname bound to one environment.
// ABOUTME: Routed or redirected through the environment-identifier alias.

use serde::{Deserialize, Serialize};

use crate::types::{DomainId, EnvironmentId, ProjectId};

/// HTTP redirect status for redirect-type domains. 301/308 are permanent,
/// 302/307 temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectCode {
    #[serde(rename = "301")]
    MovedPermanently,
    #[serde(rename = "302")]
    Found,
    #[serde(rename = "307")]
    TemporaryRedirect,
    #[serde(rename = "308")]
    PermanentRedirect,
}

impl RedirectCode {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RedirectCode::MovedPermanently | RedirectCode::PermanentRedirect
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    /// Serve the environment's current deployment on this hostname.
    Route,
    /// Redirect to the environment alias host.
    Redirect(RedirectCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Active,
    Disabled,
}

/// A user-supplied hostname. Created and verified by a collaborator; the
/// engine only reads it when emitting routing config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub hostname: String,
    pub kind: DomainKind,
    pub status: DomainStatus,
}
