// ABOUTME: Entry point for the skiff engine binary.
// ABOUTME: Wires settings, runtime, store, and background loops together.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use skiff::engine::{Engine, Monitor, StaticCredentials};
use skiff::error::{Error, Result};
use skiff::events::EventBus;
use skiff::jobs::JobQueue;
use skiff::runtime::BollardRuntime;
use skiff::settings::Settings;
use skiff::store::Store;
use skiff::types::DeploymentId;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => {
            let cwd = env::current_dir()?;
            Settings::discover(&cwd).unwrap_or_else(|_| Settings::default())
        }
    };
    let settings = Arc::new(settings);

    let runtime = BollardRuntime::connect(&settings.docker_host)
        .map_err(|e| Error::RuntimeConnection(e.to_string()))?;

    // The clone credential comes from the repo-hosting collaborator; a
    // static token covers single-tenant installs.
    let token = env::var("SKIFF_GIT_TOKEN").unwrap_or_default();

    let (jobs, job_rx) = JobQueue::new();
    let engine = Arc::new(Engine::new(
        Arc::clone(&settings),
        Arc::new(Store::new()),
        Arc::new(runtime),
        EventBus::default(),
        jobs,
        Arc::new(StaticCredentials(token)),
    ));

    match cli.command {
        Commands::Serve => {
            Arc::clone(&engine).run_workers(job_rx);
            Arc::clone(&engine).spawn_reconcile_schedule();

            let monitor = Monitor::new(Arc::clone(&engine));
            tokio::spawn(monitor.run());

            tracing::info!(
                deploy_domain = %settings.deploy_domain,
                max_jobs = settings.max_jobs,
                "engine started"
            );
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            Ok(())
        }
        Commands::Reconcile { deployment_ids } => {
            let ids = if deployment_ids.is_empty() {
                None
            } else {
                Some(deployment_ids.into_iter().map(DeploymentId::new).collect())
            };
            let counts = engine.reconcile_deployments(ids).await;
            println!(
                "processed: {}, observed: {}, missing: {}",
                counts.processed, counts.observed, counts.missing
            );
            Ok(())
        }
    }
}
