// ABOUTME: Cancellation and container cleanup: cooperative abort, deferred
// ABOUTME: deletion, and pruning of containers superseded by newer deployments.

use crate::jobs::JobKind;
use crate::model::{
    Conclusion, ContainerStatus, Deployment, DeploymentStatus, DeploymentUpdate, ProjectStatus,
};
use crate::runtime::{ContainerError, Runtime};
use crate::types::{DeploymentId, ProjectId};

use super::{Engine, EngineError};

impl<R: Runtime> Engine<R> {
    /// Cancel a deployment that has not entered its terminal stages yet.
    /// Refuses once the deployment is finalizing, failing, or completed.
    ///
    /// Concluding happens first so every other path observes the canceled
    /// state; the job abort and container stop that follow are best-effort
    /// and idempotent against the job's own unwind.
    pub async fn cancel_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<Deployment, EngineError> {
        let deployment = self.store.deployment(deployment_id)?;
        tracing::info!(deployment_id = %deployment_id, "cancel requested");

        if matches!(
            deployment.status,
            DeploymentStatus::Finalize | DeploymentStatus::Fail | DeploymentStatus::Completed
        ) || deployment.is_concluded()
        {
            return Err(EngineError::CancelRejected);
        }

        let canceled = self.update_status(
            deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Completed),
                conclusion: Some(Conclusion::Canceled),
                ..Default::default()
            },
            true,
        )?;

        if let Some(job_id) = &deployment.job_id
            && !self.jobs.abort(job_id)
        {
            tracing::debug!(deployment_id = %deployment_id, job_id = %job_id, "job already finished");
        }

        // Stop the container so logs and the app halt; deletion waits for
        // the grace period because logs may still be draining.
        if deployment.container_needs_stop()
            && let Some(container_id) = &deployment.container_id
        {
            match self
                .runtime
                .stop_container(container_id, self.settings.stop_timeout)
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
                    tracing::error!(
                        deployment_id = %deployment_id,
                        error = %e,
                        "error stopping container during cancel"
                    );
                }
            }
        }

        Ok(canceled)
    }

    /// Delete a deployment's container: stop, then force-remove. A container
    /// that is already gone counts as success. Runs after the grace period
    /// as a deferred job; never throws past its caller.
    pub async fn delete_container(&self, deployment_id: &DeploymentId) {
        let Ok(deployment) = self.store.deployment(deployment_id) else {
            tracing::warn!(deployment_id = %deployment_id, "deployment not found for container deletion");
            return;
        };
        let Some(container_id) = &deployment.container_id else {
            tracing::warn!(deployment_id = %deployment_id, "no container to delete");
            return;
        };

        tracing::info!(deployment_id = %deployment_id, container_id = %container_id, "deleting container");
        let _ = self
            .runtime
            .stop_container(container_id, self.settings.stop_timeout)
            .await;

        match self.runtime.remove_container(container_id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::error!(
                    deployment_id = %deployment_id,
                    container_id = %container_id,
                    error = %e,
                    "error deleting container"
                );
                return;
            }
        }

        if let Err(e) = self.store.update_deployment(
            deployment_id,
            DeploymentUpdate {
                container_status: Some(ContainerStatus::Removed),
                ..Default::default()
            },
        ) {
            tracing::warn!(deployment_id = %deployment_id, error = %e, "could not record container removal");
        }
    }

    /// Stop (and optionally remove) containers of completed deployments no
    /// longer referenced by any alias. Deployments an alias still points at,
    /// currently or as the rollback target, keep their containers. Continues
    /// past per-container errors so one stuck container cannot block the
    /// batch.
    pub async fn cleanup_inactive_containers(&self, project_id: &ProjectId, remove: bool) {
        let Some(project) = self.store.project(project_id) else {
            tracing::warn!(project_id = %project_id, "project not found for cleanup");
            return;
        };
        if project.status == ProjectStatus::Deleted {
            tracing::info!(project_id = %project_id, "project deleted, skipping cleanup");
            return;
        }

        let referenced = self.store.alias_referenced_deployments(project_id);
        let inactive = self.store.inactive_deployments(project_id, &referenced);

        let mut stopped = 0usize;
        let mut removed = 0usize;

        for deployment in &inactive {
            let Some(container_id) = &deployment.container_id else {
                continue;
            };
            tracing::info!(
                project_id = %project_id,
                deployment_id = %deployment.id,
                "processing inactive deployment"
            );

            match self
                .runtime
                .stop_container(container_id, self.settings.stop_timeout)
                .await
            {
                Ok(()) | Err(ContainerError::NotRunning(_)) => {
                    stopped += 1;
                    self.record_container_status(&deployment.id, ContainerStatus::Stopped);
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        project_id = %project_id,
                        container_id = %container_id,
                        "container not found during cleanup"
                    );
                    self.record_container_status(&deployment.id, ContainerStatus::Removed);
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        project_id = %project_id,
                        container_id = %container_id,
                        error = %e,
                        "error stopping inactive container"
                    );
                    continue;
                }
            }

            if remove {
                match self.runtime.remove_container(container_id, false).await {
                    Ok(()) => {
                        removed += 1;
                        self.record_container_status(&deployment.id, ContainerStatus::Removed);
                    }
                    Err(e) if e.is_not_found() => {
                        self.record_container_status(&deployment.id, ContainerStatus::Removed);
                    }
                    Err(e) => {
                        tracing::error!(
                            project_id = %project_id,
                            container_id = %container_id,
                            error = %e,
                            "error removing inactive container"
                        );
                    }
                }
            }
        }

        if stopped > 0 || removed > 0 {
            tracing::info!(project_id = %project_id, stopped, removed, "inactive container cleanup finished");
        } else {
            tracing::info!(project_id = %project_id, "no inactive containers found");
        }
    }

    fn record_container_status(&self, deployment_id: &DeploymentId, status: ContainerStatus) {
        if let Err(e) = self.store.update_deployment(
            deployment_id,
            DeploymentUpdate {
                container_status: Some(status),
                ..Default::default()
            },
        ) {
            tracing::warn!(deployment_id = %deployment_id, error = %e, "could not record container status");
        }
    }
}
