// ABOUTME: Application-wide error types for skiff.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("settings file not found in {0}")]
    SettingsNotFound(PathBuf),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to connect to container runtime: {0}")]
    RuntimeConnection(String),

    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
