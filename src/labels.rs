// ABOUTME: Container and network label keys the engine stamps and queries.
// ABOUTME: Reconciliation and network cleanup rely on these staying stable.

/// Deployment identity. Presence of this label marks a container as
/// engine-managed; reconciliation resolves stale container ids through it.
pub const DEPLOYMENT_ID: &str = "skiff.deployment_id";

pub const PROJECT_ID: &str = "skiff.project_id";

pub const ENVIRONMENT_ID: &str = "skiff.environment_id";

pub const BRANCH: &str = "skiff.branch";

/// Name of the isolation network the container was attached to at launch.
/// The readiness monitor reads this to know where to probe.
pub const WORKSPACE_NETWORK: &str = "skiff.workspace_network";

/// Marks the monitor's own container, so it can discover itself and join
/// isolation networks for probing.
pub const PROBE: &str = "skiff.probe";
