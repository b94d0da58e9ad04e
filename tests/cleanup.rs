// ABOUTME: Cleanup tests: pruning superseded containers while preserving
// ABOUTME: rollback targets, tolerant deletion, and network detach sweeps.

mod support;

use skiff::labels;
use skiff::model::{
    AliasKind, Conclusion, ContainerStatus, Deployment, DeploymentStatus, DeploymentUpdate,
    ExecutionSnapshot,
};
use skiff::network;
use skiff::runtime::ContainerState;
use skiff::types::{ContainerId, DeploymentId, EnvironmentId, ImageRef, ProjectId};
use std::collections::HashMap;
use support::*;

fn snapshot() -> ExecutionSnapshot {
    ExecutionSnapshot {
        build_command: None,
        pre_deploy_command: None,
        start_command: "./serve".to_string(),
        root_directory: None,
        runner: "python".to_string(),
        image: ImageRef::parse("runner-python").unwrap(),
        cpus: None,
        memory_mb: None,
        env_vars: vec![],
    }
}

/// A completed, succeeded deployment whose container is still running.
fn seed_completed_deployment(
    engine: &skiff::engine::Engine<FakeRuntime>,
    runtime: &FakeRuntime,
    id: &str,
) -> (DeploymentId, ContainerId) {
    let container_id = format!("ctr-{id}");
    let mut container_labels = HashMap::new();
    container_labels.insert(labels::DEPLOYMENT_ID.to_string(), id.to_string());
    runtime.seed_container(&container_id, ContainerState::Running, container_labels);

    let deployment = Deployment::new(
        DeploymentId::new(id),
        ProjectId::new("proj-1"),
        EnvironmentId::new("prod"),
        "main",
        format!("sha-{id}"),
        test_commit(),
        "acme/app",
        snapshot(),
    );
    let deployment_id = deployment.id.clone();
    engine.store.insert_deployment(deployment);
    engine
        .store
        .update_deployment(
            &deployment_id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Completed),
                conclusion: Some(Conclusion::Succeeded),
                container_id: Some(ContainerId::new(container_id.clone())),
                container_status: Some(ContainerStatus::Running),
                ..Default::default()
            },
        )
        .unwrap();

    (deployment_id, ContainerId::new(container_id))
}

/// Superseded containers are pruned, but the deployments an alias still
/// points at, currently or as the rollback target, keep theirs.
#[tokio::test]
async fn cleanup_preserves_alias_referenced_deployments() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let (engine, _rx) =
        test_engine_manual(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));

    let (_d1, c1) = seed_completed_deployment(&engine, &runtime, "dep-1");
    let (d2, c2) = seed_completed_deployment(&engine, &runtime, "dep-2");
    let (d3, c3) = seed_completed_deployment(&engine, &runtime, "dep-3");

    // dep-3 is current, dep-2 is the rollback target, dep-1 is superseded
    engine
        .store
        .upsert_alias("myapp", d2.clone(), AliasKind::Environment, "prod", None);
    engine
        .store
        .upsert_alias("myapp", d3.clone(), AliasKind::Environment, "prod", None);

    engine
        .cleanup_inactive_containers(&ProjectId::new("proj-1"), true)
        .await;

    assert!(!runtime.container_exists(&c1), "superseded container pruned");
    assert!(runtime.container_exists(&c2), "rollback target preserved");
    assert!(runtime.container_exists(&c3), "current deployment preserved");

    let d1 = engine.store.deployment(&DeploymentId::new("dep-1")).unwrap();
    assert_eq!(d1.container_status, Some(ContainerStatus::Removed));
    let d2 = engine.store.deployment(&d2).unwrap();
    assert_eq!(d2.container_status, Some(ContainerStatus::Running));
}

/// A container that disappeared out-of-band does not break the batch; its
/// terminal state is recorded and the rest proceeds.
#[tokio::test]
async fn cleanup_continues_past_missing_containers() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let (engine, _rx) =
        test_engine_manual(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));

    let (d1, c1) = seed_completed_deployment(&engine, &runtime, "dep-1");
    let (_d2, c2) = seed_completed_deployment(&engine, &runtime, "dep-2");
    runtime.vanish_container(&c1);

    engine
        .cleanup_inactive_containers(&ProjectId::new("proj-1"), true)
        .await;

    let gone = engine.store.deployment(&d1).unwrap();
    assert_eq!(gone.container_status, Some(ContainerStatus::Removed));
    assert!(!runtime.container_exists(&c2), "remaining container still pruned");
}

/// delete_container tolerates "already gone" as success.
#[tokio::test]
async fn delete_container_tolerates_already_gone() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let (engine, _rx) =
        test_engine_manual(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));

    let (d1, c1) = seed_completed_deployment(&engine, &runtime, "dep-1");
    runtime.vanish_container(&c1);

    engine.delete_container(&d1).await;

    let deployment = engine.store.deployment(&d1).unwrap();
    assert_eq!(deployment.container_status, Some(ContainerStatus::Removed));
}

/// The probe detaches from workspace networks with no live deployments, and
/// empty networks are removed; networks with deployment containers are left
/// alone.
#[tokio::test]
async fn probe_detaches_only_from_unused_networks() {
    let runtime = FakeRuntime::new();

    // Probe container attached to two workspace networks
    runtime.seed_container("probe", ContainerState::Running, {
        let mut l = HashMap::new();
        l.insert(labels::PROBE.to_string(), "true".to_string());
        l
    });
    let probe = ContainerId::new("probe");

    for name in ["skiff_workspace_p1_prod", "skiff_workspace_p1_stg"] {
        network::ensure_network(&runtime, name, HashMap::new())
            .await
            .unwrap();
        network::ensure_connected(&runtime, &probe, name)
            .await
            .unwrap();
    }

    // One network still hosts a deployment container
    runtime.seed_container("ctr-live", ContainerState::Running, {
        let mut l = HashMap::new();
        l.insert(labels::DEPLOYMENT_ID.to_string(), "dep-live".to_string());
        l
    });
    network::ensure_connected(&runtime, &ContainerId::new("ctr-live"), "skiff_workspace_p1_prod")
        .await
        .unwrap();

    network::detach_probe_from_unused_networks(&runtime, &probe).await;

    assert!(
        runtime.network_exists("skiff_workspace_p1_prod"),
        "network with live deployment kept"
    );
    assert!(
        !runtime.network_exists("skiff_workspace_p1_stg"),
        "empty network removed after probe detach"
    );
}

/// ensure_network tolerates racing creators.
#[tokio::test]
async fn ensure_network_is_idempotent() {
    let runtime = FakeRuntime::new();

    let first = network::ensure_network(&runtime, "skiff_workspace_x_y", HashMap::new())
        .await
        .unwrap();
    let second = network::ensure_network(&runtime, "skiff_workspace_x_y", HashMap::new())
        .await
        .unwrap();
    assert_eq!(first, second);
}
