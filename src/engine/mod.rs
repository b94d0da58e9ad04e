// ABOUTME: The deployment orchestration engine: shared context, job dispatch,
// ABOUTME: and the worker pool executing coordinator stages.

mod cleanup;
mod coordinator;
mod launch;
mod monitor;
mod reconcile;

pub use launch::LaunchPlan;
pub use monitor::Monitor;
pub use reconcile::ReconcileCounts;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::{EventBus, EventKind};
use crate::jobs::{Job, JobKind, JobQueue};
use crate::model::{
    CommitMeta, Deployment, DeploymentUpdate, ExecutionSnapshot, Project, Stage,
};
use crate::routing::RoutingError;
use crate::runtime::{ContainerError, ImageError, NetworkError, Runtime};
use crate::settings::Settings;
use crate::store::{Store, StoreError};
use crate::types::{DeploymentId, ImageRef, ProjectId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("no environment found for branch '{0}'")]
    NoEnvironmentForBranch(String),

    #[error("runner not set in project config")]
    RunnerNotSet,

    #[error("runner '{0}' not found in catalog")]
    RunnerNotFound(String),

    #[error("runner '{0}' is disabled")]
    RunnerDisabled(String),

    #[error("runner '{0}' has no valid image configured: {1}")]
    RunnerImageInvalid(String, String),

    #[error("start command not set in project config")]
    MissingStartCommand,

    #[error("deployment is already finalizing, failing, or completed")]
    CancelRejected,

    #[error("credential error: {0}")]
    Credentials(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Issues short-lived repository credentials for clone commands. The
/// repo-hosting API client behind this is an external collaborator.
#[async_trait]
pub trait CommitCredentials: Send + Sync {
    async fn access_token(&self, project: &Project) -> Result<String, EngineError>;
}

/// Static token source, for single-tenant installs and tests.
pub struct StaticCredentials(pub String);

#[async_trait]
impl CommitCredentials for StaticCredentials {
    async fn access_token(&self, _project: &Project) -> Result<String, EngineError> {
        Ok(self.0.clone())
    }
}

/// Shared context for every execution path: the worker pool's stage
/// handlers, the readiness monitor, and the reconciliation schedule all
/// run against one `Engine`.
pub struct Engine<R> {
    pub settings: Arc<Settings>,
    pub store: Arc<Store>,
    pub runtime: Arc<R>,
    pub events: EventBus,
    pub jobs: JobQueue,
    pub credentials: Arc<dyn CommitCredentials>,
}

impl<R: Runtime> Engine<R> {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<Store>,
        runtime: Arc<R>,
        events: EventBus,
        jobs: JobQueue,
        credentials: Arc<dyn CommitCredentials>,
    ) -> Self {
        Self {
            settings,
            store,
            runtime,
            events,
            jobs,
            credentials,
        }
    }

    /// Create a deployment record for a pushed commit and queue it for the
    /// coordinator. The execution snapshot is frozen here: later edits to
    /// the project config do not affect this deployment.
    pub fn create_deployment(
        &self,
        id: DeploymentId,
        project_id: &ProjectId,
        branch: &str,
        commit_sha: &str,
        commit: CommitMeta,
        repo_full_name: &str,
    ) -> Result<Deployment, EngineError> {
        let project = self
            .store
            .project(project_id)
            .ok_or_else(|| EngineError::ProjectNotFound(project_id.clone()))?;

        let environment = project
            .environment_for_branch(branch)
            .ok_or_else(|| EngineError::NoEnvironmentForBranch(branch.to_string()))?;

        let snapshot = self.snapshot_config(&project)?;

        let deployment = Deployment::new(
            id,
            project.id.clone(),
            environment.id.clone(),
            branch,
            commit_sha,
            commit,
            repo_full_name,
            snapshot,
        );

        self.store.insert_deployment(deployment.clone());
        self.events.emit(
            &project.id,
            Some(&deployment.id),
            Some(&deployment.environment_id),
            EventKind::DeploymentCreation,
        );

        let job_id = self
            .jobs
            .enqueue(JobKind::StartDeployment(deployment.id.clone()));
        let outcome = self.store.update_deployment(
            &deployment.id,
            DeploymentUpdate {
                job_id: Some(job_id),
                ..Default::default()
            },
        )?;

        tracing::info!(
            deployment_id = %deployment.id,
            project_id = %project.id,
            environment_id = %deployment.environment_id,
            "deployment created and queued"
        );

        Ok(outcome.deployment)
    }

    /// Validate the loosely-typed project config into a frozen execution
    /// snapshot, resolving the runner against the catalog.
    fn snapshot_config(&self, project: &Project) -> Result<ExecutionSnapshot, EngineError> {
        let config = &project.config;

        let runner_slug = config.runner.as_deref().ok_or(EngineError::RunnerNotSet)?;
        let runner = self
            .settings
            .runner(runner_slug)
            .ok_or_else(|| EngineError::RunnerNotFound(runner_slug.to_string()))?;
        if !runner.enabled {
            return Err(EngineError::RunnerDisabled(runner_slug.to_string()));
        }
        let image = ImageRef::parse(&runner.image)
            .map_err(|e| EngineError::RunnerImageInvalid(runner_slug.to_string(), e.to_string()))?;

        let start_command = config
            .start_command
            .clone()
            .ok_or(EngineError::MissingStartCommand)?;

        Ok(ExecutionSnapshot {
            build_command: config.build_command.clone(),
            pre_deploy_command: config.pre_deploy_command.clone(),
            start_command,
            root_directory: config.root_directory.clone(),
            runner: runner_slug.to_string(),
            image,
            cpus: config.cpus,
            memory_mb: config.memory_mb,
            env_vars: config.env_vars.clone(),
        })
    }

    /// Apply a lifecycle update and emit a status event when the status or
    /// conclusion actually changed. The conclusion, when present, is the
    /// emitted status value.
    pub(crate) fn update_status(
        &self,
        id: &DeploymentId,
        update: DeploymentUpdate,
        emit: bool,
    ) -> Result<Deployment, EngineError> {
        let status_value = update
            .conclusion
            .map(|c| c.to_string())
            .or_else(|| update.status.map(|s| s.to_string()));

        let outcome = self.store.update_deployment(id, update)?;

        if emit
            && outcome.applied
            && let Some(deployment_status) = status_value
        {
            self.events.emit(
                &outcome.deployment.project_id,
                Some(id),
                Some(&outcome.deployment.environment_id),
                EventKind::DeploymentStatusUpdate { deployment_status },
            );
        }

        Ok(outcome.deployment)
    }

    /// Execute one job. Stage-handler errors are routed into the fail path
    /// here instead of propagating: an uncaught error would mean blind
    /// redelivery and duplicate containers.
    pub async fn handle_job(&self, job: Job) {
        let abort = self.jobs.abort_signal(&job.id);
        match job.kind {
            JobKind::StartDeployment(deployment_id) => {
                if let Err(e) = self.start_deployment(&deployment_id, abort).await {
                    tracing::error!(deployment_id = %deployment_id, error = %e, "deployment startup failed");
                    self.jobs.enqueue(JobKind::FailDeployment {
                        deployment_id,
                        stage: Stage::Deploy,
                        reason: format!("Deployment failed unexpectedly: {e}"),
                    });
                }
            }
            JobKind::FinalizeDeployment(deployment_id) => {
                if let Err(e) = self.finalize_deployment(&deployment_id).await {
                    tracing::error!(deployment_id = %deployment_id, error = %e, "error finalizing deployment");
                    self.jobs.enqueue(JobKind::FailDeployment {
                        deployment_id,
                        stage: Stage::Finalize,
                        reason: "Failed to finalize deployment (aliases/routing). The app may still be running."
                            .to_string(),
                    });
                }
            }
            JobKind::FailDeployment {
                deployment_id,
                stage,
                reason,
            } => {
                if let Err(e) = self.fail_deployment(&deployment_id, stage, &reason).await {
                    tracing::error!(deployment_id = %deployment_id, error = %e, "error handling failed deployment");
                }
            }
            JobKind::DeleteContainer(deployment_id) => {
                self.delete_container(&deployment_id).await;
            }
            JobKind::CleanupInactiveContainers(project_id) => {
                self.cleanup_inactive_containers(&project_id, true).await;
            }
            JobKind::ReconcileDeployments { deployment_ids } => {
                let counts = self.reconcile_deployments(deployment_ids).await;
                tracing::info!(
                    processed = counts.processed,
                    observed = counts.observed,
                    missing = counts.missing,
                    "reconcile tick completed"
                );
            }
        }
    }
}

impl<R: Runtime + 'static> Engine<R> {
    /// Run the bounded worker pool over the job channel. Workers share the
    /// receiver and each executes one job at a time; concurrency is capped
    /// at `settings.max_jobs`.
    pub fn run_workers(self: Arc<Self>, rx: mpsc::UnboundedReceiver<Job>) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..self.settings.max_jobs {
            let engine = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    let job_id = job.id.clone();
                    engine.handle_job(job).await;
                    engine.jobs.finish(&job_id);
                }
            });
        }
    }

    /// Periodically enqueue a full reconciliation sweep, independent of the
    /// monitor's poll rate.
    pub fn spawn_reconcile_schedule(self: Arc<Self>) {
        let engine = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.settings.reconcile_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would race startup; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.jobs.enqueue(JobKind::ReconcileDeployments {
                    deployment_ids: None,
                });
            }
        });
    }
}
