// ABOUTME: Change-notification events published for UI and log consumers.
// ABOUTME: In-process broadcast stream keyed by project and deployment.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::ObservedStatus;
use crate::types::{DeploymentId, EnvironmentId, ProjectId};

/// What happened. Unchanged deployments emit nothing; every variant below
/// corresponds to a real state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    DeploymentCreation,
    DeploymentStatusUpdate {
        /// The conclusion when concluded, otherwise the lifecycle status.
        deployment_status: String,
    },
    DeploymentObservedUpdate {
        observed_status: ObservedStatus,
        observed_exit_code: Option<i64>,
    },
    DeploymentRollback {
        deployment_id: DeploymentId,
        previous_deployment_id: Option<DeploymentId>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub project_id: ProjectId,
    pub deployment_id: Option<DeploymentId>,
    pub environment_id: Option<EnvironmentId>,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Wire form for stream consumers: one flat JSON object with an
    /// `event_type` discriminator.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Broadcast bus for change notifications. Consumers subscribe and filter by
/// project or deployment id; slow consumers lose old events rather than
/// blocking the engine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(
        &self,
        project_id: &ProjectId,
        deployment_id: Option<&DeploymentId>,
        environment_id: Option<&EnvironmentId>,
        kind: EventKind,
    ) {
        let event = Event {
            project_id: project_id.clone(),
            deployment_id: deployment_id.cloned(),
            environment_id: environment_id.cloned(),
            kind,
            timestamp: Utc::now(),
        };
        // Send only fails when nobody is listening, which is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
