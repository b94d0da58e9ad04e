// ABOUTME: Readiness monitor: polls deploying containers, HTTP-probes the app
// ABOUTME: port, and triggers the finalize or fail transition.

use bytes::Bytes;
use chrono::Utc;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::jobs::JobKind;
use crate::labels;
use crate::model::{Deployment, Stage};
use crate::network::{detach_probe_from_unused_networks, ensure_connected};
use crate::runtime::{ContainerFilters, ContainerState, Runtime};
use crate::types::{ContainerId, DeploymentId};

use super::{Engine, EngineError};

/// Map a terminal container exit to a user-facing failure reason.
fn exit_reason(exit_code: Option<i64>) -> String {
    match exit_code {
        Some(0) => "Application exited unexpectedly; expected a long-running process".to_string(),
        Some(137) => "Application was killed, likely out of memory".to_string(),
        Some(code) => format!("Application exited with code {code}"),
        None => "Application exited unexpectedly".to_string(),
    }
}

/// Whether the app responds to HTTP on the given address. Any completed
/// response counts as ready; a refused or timed-out connection just means
/// "not yet".
async fn http_probe(ip: &str, port: u16, timeout: Duration) -> bool {
    let attempt = async {
        let stream = TcpStream::connect((ip, port)).await.ok()?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.ok()?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = hyper::Request::builder()
            .method("GET")
            .uri("/")
            .header("Host", ip)
            .body(Empty::<Bytes>::new())
            .ok()?;

        sender.send_request(request).await.ok().map(|_| true)
    };

    matches!(tokio::time::timeout(timeout, attempt).await, Ok(Some(true)))
}

/// The single continuously-running readiness loop.
///
/// The probe guard is process-local, in-memory state: it only prevents
/// overlapping probes within one monitor. Running more than one monitor
/// instance against the same store is unsupported.
pub struct Monitor<R> {
    engine: Arc<Engine<R>>,
    /// Deployments with a probe in flight. Inserted when a check begins,
    /// removed when it finishes; a deployment mid-probe is skipped that
    /// tick. Entries for deployments that left the candidate set are
    /// retired at the start of each pass, keeping the set bounded.
    probing: Mutex<HashSet<DeploymentId>>,
}

impl<R: Runtime> Monitor<R> {
    pub fn new(engine: Arc<Engine<R>>) -> Self {
        Self {
            engine,
            probing: Mutex::new(HashSet::new()),
        }
    }

    /// Run forever at the configured poll interval. Per-deployment errors
    /// fail that deployment only; the loop itself never stops.
    pub async fn run(self) {
        tracing::info!("deployment monitor started");
        loop {
            self.tick().await;
            tokio::time::sleep(self.engine.settings.monitor_poll_interval).await;
        }
    }

    /// One pass over everything currently waiting for readiness.
    pub async fn tick(&self) {
        let candidates = self.engine.store.deployments_awaiting_readiness();

        {
            let candidate_ids: HashSet<DeploymentId> =
                candidates.iter().map(|d| d.id.clone()).collect();
            self.probing.lock().retain(|id| candidate_ids.contains(id));
        }

        let probe = self.resolve_probe().await;

        let checks = candidates
            .iter()
            .map(|deployment| self.check_deployment(deployment, probe.as_ref()));
        futures::future::join_all(checks).await;

        if let Some(probe) = &probe {
            detach_probe_from_unused_networks(self.engine.runtime.as_ref(), probe).await;
        }
    }

    /// The monitor's own container, attached to isolation networks so the
    /// HTTP probe can reach deployment containers. Configured explicitly or
    /// discovered by label.
    async fn resolve_probe(&self) -> Option<ContainerId> {
        if let Some(id) = &self.engine.settings.probe_container_id {
            return Some(ContainerId::new(id.clone()));
        }

        let filters = ContainerFilters::with_label(labels::PROBE);
        let containers = self
            .engine
            .runtime
            .list_containers(&filters)
            .await
            .ok()?;
        containers
            .into_iter()
            .find(|c| c.state == "running")
            .map(|c| c.id)
    }

    async fn check_deployment(&self, deployment: &Deployment, probe: Option<&ContainerId>) {
        if !self.probing.lock().insert(deployment.id.clone()) {
            // Probe still in flight from an earlier tick
            return;
        }

        let result = self.check_inner(deployment, probe).await;
        self.probing.lock().remove(&deployment.id);

        if let Err(e) = result {
            tracing::error!(deployment_id = %deployment.id, error = %e, "unexpected error while checking status");
            self.engine.jobs.enqueue(JobKind::FailDeployment {
                deployment_id: deployment.id.clone(),
                stage: Stage::Deploy,
                reason: e.to_string(),
            });
        }
    }

    async fn check_inner(
        &self,
        deployment: &Deployment,
        probe: Option<&ContainerId>,
    ) -> Result<(), EngineError> {
        // Timeout is checked before the container is even inspected, so a
        // wedged runtime endpoint cannot keep a deployment alive forever.
        let age = deployment.age(Utc::now());
        if age.to_std().unwrap_or_default() > self.engine.settings.deployment_timeout {
            tracing::warn!(deployment_id = %deployment.id, "deployment timed out; failure job enqueued");
            self.engine.jobs.enqueue(JobKind::FailDeployment {
                deployment_id: deployment.id.clone(),
                stage: Stage::Deploy,
                reason: "Deployment timed out waiting for readiness".to_string(),
            });
            return Ok(());
        }

        let Some(container_id) = &deployment.container_id else {
            self.engine.jobs.enqueue(JobKind::FailDeployment {
                deployment_id: deployment.id.clone(),
                stage: Stage::Deploy,
                reason: "Container not found".to_string(),
            });
            return Ok(());
        };

        tracing::debug!(deployment_id = %deployment.id, container_id = %container_id, "probing container");
        let info = match self.engine.runtime.inspect_container(container_id).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                self.engine.jobs.enqueue(JobKind::FailDeployment {
                    deployment_id: deployment.id.clone(),
                    stage: Stage::Deploy,
                    reason: "Container not found".to_string(),
                });
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match info.state {
            ContainerState::Exited | ContainerState::Dead => {
                let reason = exit_reason(info.exit_code);
                tracing::warn!(deployment_id = %deployment.id, reason, "deployment failed; failure job enqueued");
                self.engine.jobs.enqueue(JobKind::FailDeployment {
                    deployment_id: deployment.id.clone(),
                    stage: Stage::Deploy,
                    reason,
                });
            }
            ContainerState::Running => {
                let Some(network) = info.labels.get(labels::WORKSPACE_NETWORK) else {
                    // Nothing to probe over; wait for reconciliation or timeout
                    return Ok(());
                };

                if let Some(probe) = probe
                    && let Err(e) =
                        ensure_connected(self.engine.runtime.as_ref(), probe, network).await
                {
                    tracing::warn!(network = %network, error = %e, "failed to attach probe to network");
                }

                let ip = info
                    .networks
                    .get(network)
                    .map(|attachment| attachment.ip_address.clone())
                    .unwrap_or_default();
                if ip.is_empty() {
                    return Ok(());
                }

                if http_probe(
                    &ip,
                    self.engine.settings.runner_port,
                    self.engine.settings.probe_timeout,
                )
                .await
                {
                    tracing::info!(deployment_id = %deployment.id, "deployment ready; finalization job enqueued");
                    self.engine
                        .jobs
                        .enqueue(JobKind::FinalizeDeployment(deployment.id.clone()));
                }
                // Anything short of a completed response just means "not
                // yet ready"; try again next tick.
            }
            _ => {}
        }

        Ok(())
    }
}
