// ABOUTME: Command-line interface definitions for the skiff binary.
// ABOUTME: Subcommands for running the engine and one-shot reconciliation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Deployment orchestration engine for git-push app hosting")]
#[command(version)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the settings file (defaults to discovery in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine: worker pool, readiness monitor, and reconciliation schedule
    Serve,

    /// Run one reconciliation sweep and exit
    Reconcile {
        /// Limit the sweep to specific deployment ids
        #[arg(value_name = "DEPLOYMENT_ID")]
        deployment_ids: Vec<String>,
    },
}
