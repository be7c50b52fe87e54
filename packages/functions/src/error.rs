// ABOUTME: Error types for serving functions
// ABOUTME: Configuration failures are raised before any container is touched

use fnserve_config::constants::RESERVED_ENV_PREFIX;
use fnserve_config::ConfigError;
use fnserve_sandbox::SandboxError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid Function name: {slug}. Must start with a letter and contain only letters, digits, '_' or '-'")]
    InvalidSlug { slug: String },

    #[error("Failed to read env file: {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse env file {path}: {source}")]
    EnvParse {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Invalid env name: {0}. Env names cannot start with {RESERVED_ENV_PREFIX}.")]
    ReservedEnvName(String),

    #[error("Failed to read import map: {path}: {source}")]
    ImportMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to check import_map.json for function {slug}: {source}")]
    ImportMapCheck {
        slug: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{container} container is not running. Start the local stack first.")]
    DatabaseNotRunning { container: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Console write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ServeError {
    /// Raised before any container call is made
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidSlug { .. }
                | Self::EnvFile { .. }
                | Self::EnvParse { .. }
                | Self::ReservedEnvName(_)
                | Self::ImportMap { .. }
                | Self::ImportMapCheck { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ServeError>;
