// ABOUTME: Reconciliation sweep: cross-checks tracked deployments against actual
// ABOUTME: container runtime state and records drift in observed fields only.

use std::collections::{HashMap, HashSet};

use crate::events::EventKind;
use crate::labels;
use crate::model::{Deployment, ObservedStatus};
use crate::runtime::{ContainerFilters, ContainerState, Runtime};
use crate::store::ObservedUpdate;
use crate::types::{ContainerId, DeploymentId};

use super::Engine;

/// Tally of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub processed: usize,
    pub observed: usize,
    pub missing: usize,
}

/// Classify a runtime container state into the closed observed set. States
/// outside the set normalize to `not_found` with a warning.
fn classify_state(state: ContainerState, deployment_id: &DeploymentId) -> ObservedStatus {
    match state {
        ContainerState::Running => ObservedStatus::Running,
        ContainerState::Exited => ObservedStatus::Exited,
        ContainerState::Dead => ObservedStatus::Dead,
        ContainerState::Paused => ObservedStatus::Paused,
        other => {
            tracing::warn!(
                deployment_id = %deployment_id,
                state = ?other,
                "unknown container status for deployment"
            );
            ObservedStatus::NotFound
        }
    }
}

impl<R: Runtime> Engine<R> {
    /// One reconciliation pass. Catches drift the event-driven monitor
    /// cannot see, e.g. after an engine restart or a container killed
    /// outside the normal flow. This path only updates observed fields; it
    /// never transitions `status` or `conclusion`.
    pub async fn reconcile_deployments(
        &self,
        deployment_ids: Option<Vec<DeploymentId>>,
    ) -> ReconcileCounts {
        let mut counts = ReconcileCounts::default();

        let candidates = self
            .store
            .reconcile_candidates(deployment_ids.as_deref());
        if candidates.is_empty() {
            tracing::info!("reconcile: no deployments found to process");
            return counts;
        }

        // One batched call instead of an inspect per deployment: index every
        // engine-managed container by its deployment label and by id.
        let filters = ContainerFilters::with_label(labels::DEPLOYMENT_ID);
        let containers = match self.runtime.list_containers(&filters).await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::error!(error = %e, "failed to list deployment containers");
                return counts;
            }
        };

        let mut container_by_deployment: HashMap<DeploymentId, ContainerId> = HashMap::new();
        let mut known_ids: HashSet<ContainerId> = HashSet::new();
        for summary in &containers {
            if let Some(deployment_id) = summary.labels.get(labels::DEPLOYMENT_ID) {
                container_by_deployment
                    .insert(DeploymentId::new(deployment_id.clone()), summary.id.clone());
            }
            known_ids.insert(summary.id.clone());
        }

        for deployment in &candidates {
            counts.processed += 1;

            // The stored id wins while the container still exists; otherwise
            // fall back to discovery by this deployment's own label. The
            // label is keyed by deployment id, so a container can never be
            // reassigned across deployments here.
            let container_id = deployment
                .container_id
                .as_ref()
                .filter(|id| known_ids.contains(id))
                .cloned()
                .or_else(|| container_by_deployment.get(&deployment.id).cloned());

            let Some(container_id) = container_id else {
                self.record_missing(deployment, &mut counts);
                continue;
            };

            let info = match self.runtime.inspect_container(&container_id).await {
                Ok(info) => info,
                Err(e) => {
                    if !e.is_not_found() {
                        tracing::warn!(container_id = %container_id, error = %e, "failed to inspect container");
                    }
                    self.record_missing(deployment, &mut counts);
                    continue;
                }
            };

            let status = classify_state(info.state, &deployment.id);
            let update = ObservedUpdate {
                status,
                exit_code: info.exit_code,
                seen: true,
            };

            match self.store.apply_observed(&deployment.id, update) {
                Ok((updated, changed)) => {
                    counts.observed += 1;
                    tracing::info!(
                        deployment_id = %deployment.id,
                        observed_status = %status,
                        exit_code = ?updated.observed.exit_code,
                        "reconcile: observed container state"
                    );
                    if changed {
                        self.emit_observed_update(&updated);
                    }
                }
                Err(e) => {
                    tracing::warn!(deployment_id = %deployment.id, error = %e, "reconcile: could not record observation");
                }
            }
        }

        counts
    }

    fn record_missing(&self, deployment: &Deployment, counts: &mut ReconcileCounts) {
        counts.missing += 1;
        let update = ObservedUpdate {
            status: ObservedStatus::NotFound,
            exit_code: None,
            seen: false,
        };
        match self.store.apply_observed(&deployment.id, update) {
            Ok((updated, changed)) => {
                tracing::info!(
                    deployment_id = %deployment.id,
                    missing_count = updated.observed.missing_count,
                    "reconcile: container not found"
                );
                if changed {
                    self.emit_observed_update(&updated);
                }
            }
            Err(e) => {
                tracing::warn!(deployment_id = %deployment.id, error = %e, "reconcile: could not record observation");
            }
        }
    }

    /// One change notification per changed deployment; unchanged deployments
    /// emit nothing, to bound event volume.
    fn emit_observed_update(&self, deployment: &Deployment) {
        let Some(observed_status) = deployment.observed.status else {
            return;
        };
        self.events.emit(
            &deployment.project_id,
            Some(&deployment.id),
            Some(&deployment.environment_id),
            EventKind::DeploymentObservedUpdate {
                observed_status,
                observed_exit_code: deployment.observed.exit_code,
            },
        );
    }
}
