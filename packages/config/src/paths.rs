// ABOUTME: Fixed project directory layout used by the function server
// ABOUTME: Functions root, fallback import map, per-function files and the host-side module cache

use crate::constants::{
    CONFIG_DIR, CONFIG_FILE, FNSERVE_CACHE_DIR, FUNCTIONS_DIR, FUNCTION_ENTRYPOINT,
    IMPORT_MAP_FILE,
};
use crate::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory layout of a project, rooted at the directory holding `supabase/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at the current working directory
    pub fn from_cwd() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `supabase/`, the base for relative paths declared in config.toml
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    pub fn functions_dir(&self) -> PathBuf {
        self.config_dir().join(FUNCTIONS_DIR)
    }

    /// Directory-wide import map shared by every function
    pub fn fallback_import_map(&self) -> PathBuf {
        self.functions_dir().join(IMPORT_MAP_FILE)
    }

    pub fn function_dir(&self, slug: &str) -> PathBuf {
        self.functions_dir().join(slug)
    }

    /// In-project import map living next to a function's entrypoint
    pub fn function_import_map(&self, slug: &str) -> PathBuf {
        self.function_dir(slug).join(IMPORT_MAP_FILE)
    }

    pub fn function_entrypoint(&self, slug: &str) -> PathBuf {
        self.function_dir(slug).join(FUNCTION_ENTRYPOINT)
    }

    /// Resolve a path declared in config.toml: absolute paths pass through,
    /// relative ones are joined onto the config directory.
    pub fn resolve_declared(&self, declared: &str) -> PathBuf {
        let path = Path::new(declared);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir().join(path)
        }
    }

    /// Resolve an operator-supplied path against the project root.
    pub fn resolve_host(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Host directory backing the runtime's compiled-module cache.
    ///
    /// Lives outside the project so it survives restarts of the server itself.
    /// `FNSERVE_CACHE_DIR` overrides the platform cache location.
    pub fn deno_cache_dir(&self) -> Result<PathBuf> {
        let dir = match std::env::var(FNSERVE_CACHE_DIR) {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => dirs::cache_dir()
                .ok_or_else(|| ConfigError::CacheDir("no platform cache directory".to_string()))?
                .join("fnserve")
                .join("deno"),
        };

        std::fs::create_dir_all(&dir)
            .map_err(|e| ConfigError::CacheDir(format!("{}: {}", dir.display(), e)))?;
        debug!("Using deno cache directory {}", dir.display());
        Ok(dir)
    }
}
