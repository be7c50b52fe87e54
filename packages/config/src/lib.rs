// ABOUTME: Declared project configuration and path layout for fnserve
// ABOUTME: Loads config.toml, applies host overrides and exposes fixed directory paths

pub mod constants;
pub mod paths;
pub mod project;

pub use paths::ProjectPaths;
pub use project::{AuthConfig, DbConfig, EdgeRuntimeConfig, FunctionConfig, ProjectConfig};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config format in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot locate cache directory: {0}")]
    CacheDir(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
