// ABOUTME: Deployment lifecycle coordinator: the start, finalize, and fail stages.
// ABOUTME: Stages chain through the job queue and each is individually idempotent.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::jobs::{AbortSignal, JobKind, is_aborted};
use crate::labels;
use crate::model::{
    Conclusion, ContainerStatus, Deployment, DeploymentError, DeploymentStatus, DeploymentUpdate,
    Stage,
};
use crate::network::{ensure_network, workspace_network_name};
use crate::routing::{setup_aliases, update_routing_config};
use crate::runtime::{ContainerError, Runtime};
use crate::types::{ContainerId, DeploymentId};

use super::launch::build_launch_plan;
use super::{Engine, EngineError};

/// Map a container-creation failure to an operator-facing reason. Creation
/// is never blindly retried; the deployment fails with this message.
fn classify_create_error(error: &ContainerError) -> String {
    match error {
        ContainerError::ImageNotFound(_) => {
            "Runner image not found. Contact your administrator.".to_string()
        }
        other => {
            let text = other.to_string();
            if text.to_lowercase().contains("port is already allocated") {
                "Port conflict. Another deployment may be using the same port.".to_string()
            } else {
                format!("Failed to create container: {text}")
            }
        }
    }
}

impl<R: Runtime> Engine<R> {
    /// Start stage: resolve everything the container needs, create and start
    /// it, and hand the deployment to the readiness monitor. Observes the
    /// abort signal at its suspension points and cleans up anything it
    /// already created when canceled.
    pub async fn start_deployment(
        &self,
        deployment_id: &DeploymentId,
        abort: AbortSignal,
    ) -> Result<(), EngineError> {
        let deployment = self.store.deployment(deployment_id)?;
        if deployment.is_concluded() {
            tracing::info!(deployment_id = %deployment_id, "deployment already concluded; skipping start");
            return Ok(());
        }
        let project = self
            .store
            .project(&deployment.project_id)
            .ok_or_else(|| EngineError::ProjectNotFound(deployment.project_id.clone()))?;

        tracing::info!(deployment_id = %deployment_id, "starting deployment");
        self.update_status(
            deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Prepare),
                ..Default::default()
            },
            true,
        )?;

        let token = self.credentials.access_token(&project).await?;
        let bindings = self
            .store
            .storage_bindings(&project.id, &deployment.environment_id);
        let plan = build_launch_plan(&deployment, &project, &self.settings, &bindings, &token);

        // Isolation network must exist before the container references it
        let mut network_labels = HashMap::new();
        network_labels.insert(labels::PROJECT_ID.to_string(), project.id.to_string());
        network_labels.insert(
            labels::ENVIRONMENT_ID.to_string(),
            deployment.environment_id.to_string(),
        );
        ensure_network(
            self.runtime.as_ref(),
            &workspace_network_name(&project.id, &deployment.environment_id),
            network_labels,
        )
        .await?;

        if is_aborted(&abort) {
            return self.unwind_canceled_start(&deployment, None).await;
        }

        tracing::info!(deployment_id = %deployment_id, "checking runner image availability");
        if !self.runtime.image_exists(&plan.image).await? {
            tracing::info!(deployment_id = %deployment_id, image = %plan.image, "pulling runner image");
            self.runtime.pull_image(&plan.image, None).await?;
            tracing::info!(deployment_id = %deployment_id, "runner image pulled");
        }

        if is_aborted(&abort) {
            return self.unwind_canceled_start(&deployment, None).await;
        }

        tracing::info!(deployment_id = %deployment_id, "preparing and starting container");
        let container_id = match self
            .runtime
            .create_container(&plan.into_container_config())
            .await
        {
            Ok(id) => id,
            Err(error) => {
                let reason = classify_create_error(&error);
                tracing::error!(deployment_id = %deployment_id, error = %error, "failed to create container");
                self.jobs.enqueue(JobKind::FailDeployment {
                    deployment_id: deployment_id.clone(),
                    stage: Stage::Prepare,
                    reason,
                });
                return Ok(());
            }
        };

        if is_aborted(&abort) {
            return self
                .unwind_canceled_start(&deployment, Some(&container_id))
                .await;
        }

        if let Err(error) = self.runtime.start_container(&container_id).await {
            // The created container would otherwise leak
            let _ = self.runtime.remove_container(&container_id, true).await;
            self.jobs.enqueue(JobKind::FailDeployment {
                deployment_id: deployment_id.clone(),
                stage: Stage::Deploy,
                reason: format!("Failed to start container: {error}"),
            });
            return Ok(());
        }

        self.update_status(
            deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Deploy),
                container_id: Some(container_id.clone()),
                container_status: Some(ContainerStatus::Running),
                ..Default::default()
            },
            true,
        )?;
        tracing::info!(
            deployment_id = %deployment_id,
            container_id = %container_id,
            "container started; monitoring"
        );

        Ok(())
    }

    /// Cancellation observed mid-start: tear down whatever was already
    /// created and conclude canceled. Both this and the cancel path may run;
    /// both are idempotent and order-tolerant.
    async fn unwind_canceled_start(
        &self,
        deployment: &Deployment,
        container_id: Option<&ContainerId>,
    ) -> Result<(), EngineError> {
        tracing::info!(deployment_id = %deployment.id, "deployment canceled during start");

        let mut container_status = None;
        if let Some(container_id) = container_id {
            if let Err(e) = self
                .runtime
                .stop_container(container_id, self.settings.stop_timeout)
                .await
                && !e.is_not_found()
            {
                tracing::warn!(deployment_id = %deployment.id, error = %e, "error stopping canceled container");
            }
            self.jobs.enqueue_after(
                self.settings.container_delete_grace,
                JobKind::DeleteContainer(deployment.id.clone()),
            );
            container_status = Some(ContainerStatus::Stopped);
        }

        self.update_status(
            &deployment.id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Completed),
                conclusion: Some(Conclusion::Canceled),
                container_id: container_id.cloned(),
                container_status,
                ..Default::default()
            },
            true,
        )?;

        Ok(())
    }

    /// Finalize stage, triggered by the monitor once the app is observed
    /// ready: publish aliases and routing, then conclude succeeded. Routing
    /// is necessary for user-visible success, so alias/routing errors
    /// propagate to the caller, which routes them into the fail path.
    pub async fn finalize_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<(), EngineError> {
        let deployment = self.store.deployment(deployment_id)?;

        if deployment.conclusion == Some(Conclusion::Canceled) {
            tracing::info!(deployment_id = %deployment_id, "deployment already canceled; skipping finalize");
            return Ok(());
        }

        let project = self
            .store
            .project(&deployment.project_id)
            .ok_or_else(|| EngineError::ProjectNotFound(deployment.project_id.clone()))?;

        tracing::info!(deployment_id = %deployment_id, "finalizing deployment");
        setup_aliases(&self.store, &deployment, &project, &self.settings);

        // Include this deployment explicitly: its conclusion is not
        // committed yet, so the succeeded-only filter would miss it.
        let mut include = HashSet::new();
        include.insert(deployment.id.clone());
        if let Err(e) = update_routing_config(&self.store, &self.settings, &project, &include) {
            tracing::error!(deployment_id = %deployment_id, error = %e, "failed to update routing config");
        }

        self.update_status(
            deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Completed),
                conclusion: Some(Conclusion::Succeeded),
                ..Default::default()
            },
            true,
        )?;

        self.jobs
            .enqueue(JobKind::CleanupInactiveContainers(project.id.clone()));
        tracing::info!(
            deployment_id = %deployment_id,
            project_id = %project.id,
            "deployment finalized; inactive container cleanup queued"
        );

        Ok(())
    }

    /// Fail stage. Idempotent: an already-concluded deployment is a no-op.
    /// Best-effort stops the container and schedules its deletion after the
    /// grace period, then concludes failed with the stage and reason.
    ///
    /// Exception: failures originating in finalize leave the container
    /// running. The app is healthy; only its routing is missing, and tearing
    /// it down would turn a routing problem into an outage.
    pub async fn fail_deployment(
        &self,
        deployment_id: &DeploymentId,
        stage: Stage,
        reason: &str,
    ) -> Result<(), EngineError> {
        let deployment = self.store.deployment(deployment_id)?;

        if deployment.is_concluded() {
            tracing::info!(
                deployment_id = %deployment_id,
                conclusion = ?deployment.conclusion,
                "deployment already concluded; skipping fail handler"
            );
            return Ok(());
        }

        tracing::info!(deployment_id = %deployment_id, stage = %stage, reason, "handling failed deployment");
        self.update_status(
            deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Fail),
                ..Default::default()
            },
            true,
        )?;

        if stage != Stage::Finalize
            && deployment.container_needs_stop()
            && let Some(container_id) = deployment.container_id.clone()
        {
            match self
                .runtime
                .stop_container(&container_id, self.settings.stop_timeout)
                .await
            {
                Ok(()) | Err(ContainerError::NotRunning(_)) => {
                    self.jobs.enqueue_after(
                        self.settings.container_delete_grace,
                        JobKind::DeleteContainer(deployment_id.clone()),
                    );
                    self.update_status(
                        deployment_id,
                        DeploymentUpdate {
                            container_status: Some(ContainerStatus::Stopped),
                            ..Default::default()
                        },
                        false,
                    )?;
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        deployment_id = %deployment_id,
                        container_id = %container_id,
                        "container not found, already removed"
                    );
                    self.update_status(
                        deployment_id,
                        DeploymentUpdate {
                            container_status: Some(ContainerStatus::Removed),
                            ..Default::default()
                        },
                        false,
                    )?;
                }
                Err(e) => {
                    // Cleanup must never throw past its caller
                    tracing::error!(
                        deployment_id = %deployment_id,
                        container_id = %container_id,
                        error = %e,
                        "error cleaning up container"
                    );
                }
            }
        }

        self.update_status(
            deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Completed),
                conclusion: Some(Conclusion::Failed),
                error: Some(DeploymentError {
                    stage,
                    message: if reason.is_empty() {
                        "Deployment failed".to_string()
                    } else {
                        reason.to_string()
                    },
                }),
                ..Default::default()
            },
            true,
        )?;
        tracing::error!(deployment_id = %deployment_id, "deployment failed and cleaned up");

        Ok(())
    }
}
