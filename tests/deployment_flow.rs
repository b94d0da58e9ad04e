// ABOUTME: End-to-end deployment lifecycle scenarios against the fake runtime.
// ABOUTME: Happy path, rollback ping-pong, crash detection, cancel, and idempotence.

mod support;

use skiff::engine::{EngineError, Monitor};
use skiff::model::{Conclusion, ContainerStatus, DeploymentStatus, Stage};
use skiff::routing;
use skiff::types::DeploymentId;
use std::sync::Arc;
use support::*;

async fn deploy_to_running(
    engine: &Arc<skiff::engine::Engine<FakeRuntime>>,
    id: &str,
) -> DeploymentId {
    let deployment = engine
        .create_deployment(
            DeploymentId::new(id),
            &skiff::types::ProjectId::new("proj-1"),
            "main",
            &format!("sha-{id}"),
            test_commit(),
            "acme/app",
        )
        .expect("deployment should be created");

    let deployment_id = deployment.id.clone();
    wait_until(
        || {
            engine
                .store
                .deployment(&deployment_id)
                .is_ok_and(|d| d.status == DeploymentStatus::Deploy)
        },
        "deployment to reach deploy",
    )
    .await;
    deployment_id
}

/// Scenario: a push to main deploys to prod; the monitor observes a
/// successful probe; the deployment concludes succeeded and the `myapp`
/// alias points at it.
#[tokio::test]
async fn successful_deployment_publishes_aliases() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let port = spawn_http_ok().await;

    let runtime = FakeRuntime::new();
    runtime.set_container_ip("127.0.0.1");
    runtime.add_image("runner-python:latest");

    let mut settings = test_settings(traefik_dir.path().to_path_buf());
    settings.runner_port = port;

    let engine = test_engine(runtime.clone(), settings);
    let id = deploy_to_running(&engine, "dep-1").await;

    let deployment = engine.store.deployment(&id).unwrap();
    assert_eq!(deployment.container_status, Some(ContainerStatus::Running));
    let container = runtime.container(deployment.container_id.as_ref().unwrap());
    assert!(container.is_some(), "container should exist");

    let monitor = Monitor::new(Arc::clone(&engine));
    monitor.tick().await;

    wait_until(
        || engine.store.deployment(&id).is_ok_and(|d| d.is_concluded()),
        "deployment to conclude",
    )
    .await;

    let deployment = engine.store.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.conclusion, Some(Conclusion::Succeeded));
    assert!(deployment.error.is_none());

    let alias = engine.store.alias_by_subdomain("myapp").unwrap();
    assert_eq!(alias.deployment_id, id);
    assert!(
        engine
            .store
            .alias_by_subdomain("myapp-branch-main")
            .is_some()
    );
    assert!(
        engine
            .store
            .alias_by_subdomain("myapp-env-id-prod")
            .is_some()
    );

    assert!(
        traefik_dir.path().join("project_proj-1.yml").exists(),
        "routing config should be published"
    );
    assert!(runtime.network_exists("skiff_workspace_proj-1_prod"));
}

/// Scenario: a second deployment supersedes the first on the alias, and
/// rolling back flips the pair; rolling back twice restores it.
#[tokio::test]
async fn second_deployment_shifts_alias_and_rollback_flips_it() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let port = spawn_http_ok().await;

    let runtime = FakeRuntime::new();
    runtime.set_container_ip("127.0.0.1");
    runtime.add_image("runner-python:latest");

    let mut settings = test_settings(traefik_dir.path().to_path_buf());
    settings.runner_port = port;

    let engine = test_engine(runtime.clone(), settings);
    let monitor = Monitor::new(Arc::clone(&engine));

    for id in ["dep-1", "dep-2"] {
        let deployment_id = deploy_to_running(&engine, id).await;
        monitor.tick().await;
        wait_until(
            || {
                engine
                    .store
                    .deployment(&deployment_id)
                    .is_ok_and(|d| d.conclusion == Some(Conclusion::Succeeded))
            },
            "deployment to succeed",
        )
        .await;
    }

    let alias = engine.store.alias_by_subdomain("myapp").unwrap();
    assert_eq!(alias.deployment_id, DeploymentId::new("dep-2"));
    assert_eq!(
        alias.previous_deployment_id,
        Some(DeploymentId::new("dep-1"))
    );

    let project = engine.store.project(&skiff::types::ProjectId::new("proj-1")).unwrap();
    let environment = project
        .environment(&skiff::types::EnvironmentId::new("prod"))
        .unwrap()
        .clone();

    let rolled = routing::rollback(
        &engine.store,
        &engine.events,
        &engine.settings,
        &project,
        &environment,
    )
    .unwrap();
    assert_eq!(rolled.deployment_id, DeploymentId::new("dep-1"));
    assert_eq!(
        rolled.previous_deployment_id,
        Some(DeploymentId::new("dep-2"))
    );

    // Involution: a second rollback restores the original pair
    let restored = routing::rollback(
        &engine.store,
        &engine.events,
        &engine.settings,
        &project,
        &environment,
    )
    .unwrap();
    assert_eq!(restored.deployment_id, DeploymentId::new("dep-2"));
    assert_eq!(
        restored.previous_deployment_id,
        Some(DeploymentId::new("dep-1"))
    );
}

/// Scenario: the container is killed (exit 137) while deploying; the
/// deployment fails with an out-of-memory reason.
#[tokio::test]
async fn oom_killed_container_fails_deployment() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    runtime.add_image("runner-python:latest");

    let engine = test_engine(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));
    let id = deploy_to_running(&engine, "dep-oom").await;

    let deployment = engine.store.deployment(&id).unwrap();
    runtime.exit_container(deployment.container_id.as_ref().unwrap(), 137);

    let monitor = Monitor::new(Arc::clone(&engine));
    monitor.tick().await;

    wait_until(
        || engine.store.deployment(&id).is_ok_and(|d| d.is_concluded()),
        "deployment to conclude",
    )
    .await;

    let deployment = engine.store.deployment(&id).unwrap();
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    let error = deployment.error.expect("failure reason should be stored");
    assert_eq!(error.stage, Stage::Deploy);
    assert!(
        error.message.contains("out of memory"),
        "reason should mention out-of-memory, got: {}",
        error.message
    );
}

/// Scenario: cancel mid-deploy concludes canceled and schedules container
/// deletion for later instead of deleting inline.
#[tokio::test]
async fn cancel_mid_deploy_schedules_deferred_deletion() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    runtime.add_image("runner-python:latest");

    let engine = test_engine(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));
    let id = deploy_to_running(&engine, "dep-cancel").await;

    let container_id = engine
        .store
        .deployment(&id)
        .unwrap()
        .container_id
        .unwrap();

    let canceled = engine.cancel_deployment(&id).await.unwrap();
    assert_eq!(canceled.status, DeploymentStatus::Completed);
    assert_eq!(canceled.conclusion, Some(Conclusion::Canceled));

    // Deletion is deferred by the grace period, not executed inline
    assert!(runtime.container_exists(&container_id));

    wait_until(
        || !runtime.container_exists(&container_id),
        "container to be deleted after grace period",
    )
    .await;

    let deployment = engine.store.deployment(&id).unwrap();
    assert_eq!(deployment.container_status, Some(ContainerStatus::Removed));
}

/// Scenario: canceling an already-concluded deployment is rejected and
/// changes nothing.
#[tokio::test]
async fn cancel_after_conclusion_is_rejected() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    runtime.add_image("runner-python:latest");

    let engine = test_engine(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));
    let id = deploy_to_running(&engine, "dep-e").await;

    engine
        .fail_deployment(&id, Stage::Deploy, "Application exited with code 1")
        .await
        .unwrap();
    let failed = engine.store.deployment(&id).unwrap();
    assert_eq!(failed.conclusion, Some(Conclusion::Failed));

    let result = engine.cancel_deployment(&id).await;
    assert!(matches!(result, Err(EngineError::CancelRejected)));

    let unchanged = engine.store.deployment(&id).unwrap();
    assert_eq!(unchanged.conclusion, Some(Conclusion::Failed));
    assert_eq!(
        unchanged.error.as_ref().map(|e| e.message.clone()),
        failed.error.map(|e| e.message)
    );
}

/// The fail path is idempotent: a second fail call is a no-op and the first
/// reason wins.
#[tokio::test]
async fn fail_path_is_idempotent() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    runtime.add_image("runner-python:latest");

    let engine = test_engine(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));
    let id = deploy_to_running(&engine, "dep-twice").await;

    engine
        .fail_deployment(&id, Stage::Deploy, "first reason")
        .await
        .unwrap();
    engine
        .fail_deployment(&id, Stage::Prepare, "second reason")
        .await
        .unwrap();

    let deployment = engine.store.deployment(&id).unwrap();
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    assert_eq!(deployment.error.unwrap().message, "first reason");
}

/// Container creation failures are classified into a human reason and fail
/// the deployment at the prepare stage without retries.
#[tokio::test]
async fn create_failure_classifies_port_conflict() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    runtime.add_image("runner-python:latest");
    runtime.fail_next_create("driver failed: port is already allocated");

    let engine = test_engine(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));
    let deployment = engine
        .create_deployment(
            DeploymentId::new("dep-conflict"),
            &skiff::types::ProjectId::new("proj-1"),
            "main",
            "sha-x",
            test_commit(),
            "acme/app",
        )
        .unwrap();

    let id = deployment.id.clone();
    wait_until(
        || engine.store.deployment(&id).is_ok_and(|d| d.is_concluded()),
        "deployment to conclude",
    )
    .await;

    let deployment = engine.store.deployment(&id).unwrap();
    assert_eq!(deployment.conclusion, Some(Conclusion::Failed));
    let error = deployment.error.unwrap();
    assert_eq!(error.stage, Stage::Prepare);
    assert!(error.message.contains("Port conflict"));
}

/// An absent runner image is pulled before the container is created.
#[tokio::test]
async fn absent_image_is_pulled_first() {
    let traefik_dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();

    let engine = test_engine(runtime.clone(), test_settings(traefik_dir.path().to_path_buf()));
    let id = deploy_to_running(&engine, "dep-pull").await;

    assert_eq!(runtime.pulled_images(), vec!["runner-python:latest"]);
    assert!(
        engine
            .store
            .deployment(&id)
            .unwrap()
            .container_id
            .is_some()
    );
}
