// ABOUTME: Builds the launch plan for a deployment container: shell command
// ABOUTME: sequence, namespaced env vars, identity labels, mounts, and resources.

use std::collections::HashMap;

use crate::labels;
use crate::model::{Deployment, Project, StorageBinding};
use crate::network::workspace_network_name;
use crate::routing::alias_domains;
use crate::runtime::{BindMount, ContainerConfig, LogConfig, ResourceLimits};
use crate::settings::Settings;
use crate::types::ImageRef;

/// Env var holding the throwaway clone credential inside the container; the
/// clone step unsets it and removes the askpass helper once checkout is done.
const GIT_TOKEN_VAR: &str = "SKIFF_GIT_TOKEN";

const ASKPASS_PATH: &str = "/tmp/skiff-git-askpass";

/// Everything needed to create the deployment's container.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub container_name: String,
    pub image: ImageRef,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<BindMount>,
    pub network: String,
    pub resources: ResourceLimits,
}

impl LaunchPlan {
    pub fn into_container_config(self) -> ContainerConfig {
        ContainerConfig {
            name: self.container_name,
            image: self.image,
            command: self.command,
            env: self.env,
            labels: self.labels,
            working_dir: Some("/app".to_string()),
            mounts: self.mounts,
            network: Some(self.network),
            resources: Some(self.resources),
            security_opt: vec!["no-new-privileges:true".to_string()],
            log_config: Some(LogConfig::bounded_json_file()),
        }
    }
}

/// Build the launch plan. The short-lived `token` authenticates the shallow
/// clone and never outlives the checkout step.
pub fn build_launch_plan(
    deployment: &Deployment,
    project: &Project,
    settings: &Settings,
    bindings: &[StorageBinding],
    token: &str,
) -> LaunchPlan {
    let network = workspace_network_name(&project.id, &deployment.environment_id);

    let mut env = runtime_env_vars(deployment, project, settings);
    env.insert(GIT_TOKEN_VAR.to_string(), token.to_string());

    LaunchPlan {
        container_name: format!("runner-{}", deployment.id.short()),
        image: deployment.snapshot.image.clone(),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            compose_commands(deployment).join(" && "),
        ],
        env,
        labels: container_labels(deployment, project, settings, &network),
        mounts: storage_mounts(deployment, settings, bindings),
        network,
        resources: resolve_resources(deployment, settings),
    }
}

/// Per-deployment hostname label, e.g. `myapp-4f2a91c`.
pub fn deployment_host_slug(deployment: &Deployment, project: &Project) -> String {
    format!("{}-{}", project.slug, deployment.id.short())
}

/// The shell command sequence run inside the runner: clone the exact commit,
/// move into the root directory, build, pre-deploy, then exec the start
/// command. User commands run in subshells so their `cd`/`export` don't leak.
fn compose_commands(deployment: &Deployment) -> Vec<String> {
    let mut commands = Vec::new();
    let snapshot = &deployment.snapshot;

    commands.push(format!(
        "echo 'Cloning {} (Branch: {}, Commit: {})'",
        deployment.repo_full_name,
        deployment.branch,
        &deployment.commit_sha[..deployment.commit_sha.len().min(7)],
    ));

    // Shallow fetch of the exact sha with a throwaway askpass credential.
    // The token is scrubbed from the environment before user commands run.
    commands.push(format!(
        "git init -q && \
         printf '%s\\n' '#!/bin/sh' 'case \"$1\" in *Username*) echo \"x-access-token\";; *) echo \"${GIT_TOKEN_VAR}\";; esac' > {ASKPASS_PATH} && \
         chmod 700 {ASKPASS_PATH} && \
         export GIT_ASKPASS={ASKPASS_PATH} GIT_TERMINAL_PROMPT=0 && \
         git fetch -q --depth 1 https://github.com/{repo}.git {sha} && \
         git checkout -q FETCH_HEAD && \
         unset GIT_ASKPASS GIT_TERMINAL_PROMPT {GIT_TOKEN_VAR} && \
         rm -f {ASKPASS_PATH}",
        repo = deployment.repo_full_name,
        sha = deployment.commit_sha,
    ));

    if let Some(root) = normalized_root_directory(snapshot.root_directory.as_deref()) {
        let quoted = shell_quote(&root);
        commands.push(format!("echo 'Changing root directory to {root}'"));
        commands.push(format!(
            "test -d {quoted} || {{ printf '\\033[31mError: root directory %s not found\\033[0m\\n' {quoted} 1>&2; exit 1; }}"
        ));
        commands.push(format!("cd {quoted}"));
    }

    if let Some(build) = &snapshot.build_command {
        commands.push("echo 'Installing dependencies...'".to_string());
        commands.push(format!("( {build} )"));
    }

    if let Some(pre_deploy) = &snapshot.pre_deploy_command {
        commands.push("echo 'Running pre-deploy command...'".to_string());
        commands.push(format!("( {pre_deploy} )"));
    }

    commands.push("echo 'Starting application...'".to_string());
    commands.push(format!("( {} )", snapshot.start_command));

    commands
}

/// Normalize a configured root directory to a relative path. Empty and "."
/// results mean the repository root, i.e. no directory change.
fn normalized_root_directory(root: Option<&str>) -> Option<String> {
    let root = root?.trim();
    let root = root.trim_start_matches("./").trim_matches('/');
    match root {
        "" | "." => None,
        _ => Some(root.to_string()),
    }
}

/// Quote a string for POSIX sh.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Namespaced env vars injected into the runner. User-declared vars win for
/// any name they explicitly set.
fn runtime_env_vars(
    deployment: &Deployment,
    project: &Project,
    settings: &Settings,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = deployment
        .snapshot
        .env_vars
        .iter()
        .map(|v| (v.key.clone(), v.value.clone()))
        .collect();

    let host = format!(
        "{}.{}",
        deployment_host_slug(deployment, project),
        settings.deploy_domain
    );
    let environment_slug = project
        .environment(&deployment.environment_id)
        .map(|e| e.slug.clone())
        .unwrap_or_else(|| deployment.environment_id.to_string());

    let mut vars: Vec<(&str, String)> = vec![
        ("SKIFF", "true".to_string()),
        ("SKIFF_URL", format!("{}://{}", settings.url_scheme, host)),
        ("SKIFF_DOMAIN", host),
        ("SKIFF_TEAM_ID", project.team_id.to_string()),
        ("SKIFF_PROJECT_ID", project.id.to_string()),
        ("SKIFF_ENVIRONMENT", environment_slug),
        ("SKIFF_DEPLOYMENT_ID", deployment.id.to_string()),
        (
            "SKIFF_DEPLOYMENT_CREATED_AT",
            deployment.created_at.to_rfc3339(),
        ),
        ("SKIFF_GIT_REPO", deployment.repo_full_name.clone()),
        ("SKIFF_GIT_REF", deployment.branch.clone()),
        ("SKIFF_GIT_COMMIT_SHA", deployment.commit_sha.clone()),
    ];

    if let Some(ip) = &settings.server_ip {
        vars.push(("SKIFF_IP", ip.clone()));
    }

    let domains = alias_domains(deployment, project, settings);
    if let Some(domain) = domains.environment_domain {
        vars.push(("SKIFF_DOMAIN_ENVIRONMENT", domain));
    }
    if let Some(url) = domains.environment_url {
        vars.push(("SKIFF_URL_ENVIRONMENT", url));
    }
    if let Some(domain) = domains.branch_domain {
        vars.push(("SKIFF_DOMAIN_BRANCH", domain));
    }
    if let Some(url) = domains.branch_url {
        vars.push(("SKIFF_URL_BRANCH", url));
    }

    if !deployment.commit.author.is_empty() {
        vars.push(("SKIFF_GIT_COMMIT_AUTHOR", deployment.commit.author.clone()));
    }
    if !deployment.commit.message.is_empty() {
        vars.push((
            "SKIFF_GIT_COMMIT_MESSAGE",
            deployment.commit.message.clone(),
        ));
    }

    if let Some((owner, name)) = deployment.repo_full_name.split_once('/') {
        vars.push(("SKIFF_GIT_REPO_OWNER", owner.to_string()));
        vars.push(("SKIFF_GIT_REPO_NAME", name.to_string()));
    }

    for (key, value) in vars {
        if !value.is_empty() {
            env.entry(key.to_string()).or_insert(value);
        }
    }

    env
}

/// Identification labels for reconciliation lookup plus reverse-proxy rules
/// for the per-deployment hostname. Alias routers carry higher priority, so
/// this low-priority rule only serves the unique deployment URL.
fn container_labels(
    deployment: &Deployment,
    project: &Project,
    settings: &Settings,
    network: &str,
) -> HashMap<String, String> {
    let router = format!("deployment-{}", deployment.id);
    let host = format!(
        "{}.{}",
        deployment_host_slug(deployment, project),
        settings.deploy_domain
    );

    let mut map = HashMap::new();
    map.insert("traefik.enable".to_string(), "true".to_string());
    map.insert(
        format!("traefik.http.routers.{router}.rule"),
        format!("Host(`{host}`)"),
    );
    map.insert(
        format!("traefik.http.routers.{router}.service"),
        format!("{router}@docker"),
    );
    map.insert(
        format!("traefik.http.routers.{router}.priority"),
        "10".to_string(),
    );
    map.insert(
        format!("traefik.http.services.{router}.loadbalancer.server.port"),
        settings.runner_port.to_string(),
    );
    map.insert("traefik.docker.network".to_string(), network.to_string());

    if settings.url_scheme == "https" {
        map.insert(
            format!("traefik.http.routers.{router}.entrypoints"),
            "websecure".to_string(),
        );
        map.insert(format!("traefik.http.routers.{router}.tls"), "true".to_string());
        map.insert(
            format!("traefik.http.routers.{router}.tls.certresolver"),
            "le".to_string(),
        );
    } else {
        map.insert(
            format!("traefik.http.routers.{router}.entrypoints"),
            "web".to_string(),
        );
    }

    map.insert(labels::DEPLOYMENT_ID.to_string(), deployment.id.to_string());
    map.insert(labels::PROJECT_ID.to_string(), project.id.to_string());
    map.insert(
        labels::ENVIRONMENT_ID.to_string(),
        deployment.environment_id.to_string(),
    );
    map.insert(labels::BRANCH.to_string(), deployment.branch.clone());
    map.insert(labels::WORKSPACE_NETWORK.to_string(), network.to_string());

    map
}

/// Bind mounts for storage resources associated with this deployment's
/// environment.
fn storage_mounts(
    deployment: &Deployment,
    settings: &Settings,
    bindings: &[StorageBinding],
) -> Vec<BindMount> {
    bindings
        .iter()
        .filter(|b| b.applies_to(&deployment.environment_id))
        .map(|b| BindMount {
            source: settings
                .host_storage_base()
                .join("storage")
                .join(b.team_id.as_str())
                .join(b.kind.as_str())
                .join(&b.name)
                .to_string_lossy()
                .into_owned(),
            target: format!("/data/{}/{}", b.kind.as_str(), b.name),
            read_only: false,
        })
        .collect()
}

/// Resolve declared resource limits against platform defaults and ceilings.
/// Overrides are honored only when the platform configures both; anything
/// exceeding or invalid relative to the ceiling is clamped or dropped with a
/// warning, never a hard failure.
fn resolve_resources(deployment: &Deployment, settings: &Settings) -> ResourceLimits {
    let snapshot = &deployment.snapshot;

    let mut cpus = settings.default_cpus;
    if settings.allow_custom_cpu()
        && let Some(override_cpus) = snapshot.cpus
    {
        let max = settings.max_cpus.unwrap_or(override_cpus);
        if override_cpus > 0.0 {
            cpus = Some(override_cpus.min(max));
        } else {
            tracing::warn!(
                deployment_id = %deployment.id,
                "invalid CPU override in config; using default"
            );
        }
    }

    let mut memory_mb = settings.default_memory_mb;
    if settings.allow_custom_memory()
        && let Some(override_mb) = snapshot.memory_mb
    {
        let max = settings.max_memory_mb.unwrap_or(override_mb);
        if override_mb > 0 {
            memory_mb = Some(override_mb.min(max));
        } else {
            tracing::warn!(
                deployment_id = %deployment.id,
                "invalid memory override in config; using default"
            );
        }
    }

    ResourceLimits { cpus, memory_mb }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CommitMeta, Deployment, Environment, EnvVar, ExecutionSnapshot, Project, ProjectConfig,
        ProjectStatus,
    };
    use crate::types::{DeploymentId, EnvironmentId, ProjectId, Slug, TeamId};
    use chrono::Utc;

    fn project() -> Project {
        Project {
            id: ProjectId::new("proj-1"),
            slug: Slug::new("myapp").unwrap(),
            team_id: TeamId::new("team-1"),
            status: ProjectStatus::Active,
            environments: vec![Environment {
                id: EnvironmentId::new("prod"),
                slug: "production".to_string(),
                branch: "main".to_string(),
                name: "Production".to_string(),
            }],
            config: ProjectConfig::default(),
        }
    }

    fn deployment(snapshot: ExecutionSnapshot) -> Deployment {
        Deployment::new(
            DeploymentId::new("abcdef1234"),
            ProjectId::new("proj-1"),
            EnvironmentId::new("prod"),
            "main",
            "f00dfeedbeef",
            CommitMeta {
                author: "dev".into(),
                message: "ship".into(),
                date: Utc::now(),
            },
            "acme/app",
            snapshot,
        )
    }

    fn snapshot() -> ExecutionSnapshot {
        ExecutionSnapshot {
            build_command: Some("npm install".to_string()),
            pre_deploy_command: None,
            start_command: "npm start".to_string(),
            root_directory: None,
            runner: "node".to_string(),
            image: ImageRef::parse("runner-node").unwrap(),
            cpus: None,
            memory_mb: None,
            env_vars: vec![EnvVar {
                key: "MY_VAR".to_string(),
                value: "custom".to_string(),
            }],
        }
    }

    fn settings() -> Settings {
        Settings {
            deploy_domain: "apps.example.com".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn command_sequence_clones_builds_and_starts() {
        let d = deployment(snapshot());
        let commands = compose_commands(&d);
        let joined = commands.join(" && ");

        assert!(joined.contains("git fetch -q --depth 1"));
        assert!(joined.contains("f00dfeedbeef"));
        assert!(joined.contains("( npm install )"));
        assert!(joined.contains("( npm start )"));
        assert!(joined.contains("unset GIT_ASKPASS"));
        // build must come after checkout, start last
        let build_pos = joined.find("npm install").unwrap();
        let start_pos = joined.find("npm start").unwrap();
        assert!(build_pos < start_pos);
    }

    #[test]
    fn root_directory_is_validated_before_cd() {
        let mut snap = snapshot();
        snap.root_directory = Some("./packages/web/".to_string());
        let d = deployment(snap);
        let joined = compose_commands(&d).join(" && ");

        assert!(joined.contains("test -d 'packages/web'"));
        assert!(joined.contains("cd 'packages/web'"));
        assert!(joined.contains("root directory %s not found"));
    }

    #[test]
    fn blank_root_directory_is_ignored() {
        assert_eq!(normalized_root_directory(Some("  ")), None);
        assert_eq!(normalized_root_directory(Some("./")), None);
        assert_eq!(normalized_root_directory(Some(".")), None);
        assert_eq!(
            normalized_root_directory(Some("/src/")),
            Some("src".to_string())
        );
    }

    #[test]
    fn user_env_vars_win_over_runtime_vars() {
        let mut snap = snapshot();
        snap.env_vars.push(EnvVar {
            key: "SKIFF_ENVIRONMENT".to_string(),
            value: "overridden".to_string(),
        });
        let d = deployment(snap);
        let env = runtime_env_vars(&d, &project(), &settings());

        assert_eq!(env.get("SKIFF_ENVIRONMENT").unwrap(), "overridden");
        assert_eq!(env.get("SKIFF").unwrap(), "true");
        assert_eq!(env.get("MY_VAR").unwrap(), "custom");
        assert_eq!(env.get("SKIFF_GIT_REPO_OWNER").unwrap(), "acme");
        assert_eq!(
            env.get("SKIFF_DOMAIN").unwrap(),
            "myapp-abcdefg.apps.example.com"
        );
    }

    #[test]
    fn labels_identify_deployment_for_reconciliation() {
        let d = deployment(snapshot());
        let labels_map = container_labels(&d, &project(), &settings(), "skiff_workspace_proj-1_prod");

        assert_eq!(
            labels_map.get(labels::DEPLOYMENT_ID).unwrap(),
            "abcdef1234"
        );
        assert_eq!(
            labels_map.get(labels::WORKSPACE_NETWORK).unwrap(),
            "skiff_workspace_proj-1_prod"
        );
        assert_eq!(
            labels_map
                .get("traefik.http.routers.deployment-abcdef1234.priority")
                .unwrap(),
            "10"
        );
    }

    #[test]
    fn resource_overrides_are_clamped_to_ceiling() {
        let mut s = settings();
        s.default_cpus = Some(1.0);
        s.max_cpus = Some(2.0);
        s.default_memory_mb = Some(512);
        s.max_memory_mb = Some(1024);

        let mut snap = snapshot();
        snap.cpus = Some(8.0);
        snap.memory_mb = Some(4096);
        let d = deployment(snap);

        let limits = resolve_resources(&d, &s);
        assert_eq!(limits.cpus, Some(2.0));
        assert_eq!(limits.memory_mb, Some(1024));
    }

    #[test]
    fn overrides_ignored_without_ceiling() {
        let mut snap = snapshot();
        snap.cpus = Some(8.0);
        let d = deployment(snap);

        let limits = resolve_resources(&d, &settings());
        assert_eq!(limits.cpus, None);
    }
}
