// ABOUTME: Sandbox specifications and in-sandbox command lines for serving functions
// ABOUTME: The import-map flag is emitted only when an import map is actually present

use crate::env::{relay_container_env, runtime_container_env, UserEnv};
use crate::resolver::{file_present, ResolvedConfig};
use crate::{Result, ServeError};
use fnserve_config::constants::{
    FUNCTION_ENTRYPOINT, HOST_GATEWAY_ALIAS, IMPORT_MAP_FILE, MANAGED_LABEL, PROJECT_LABEL,
    RUNTIME_PORT, SANDBOX_CUSTOM_IMPORT_MAP, SANDBOX_DENO_CACHE_DIR, SANDBOX_FUNCTIONS_DIR,
};
use fnserve_config::{ProjectConfig, ProjectPaths};
use fnserve_sandbox::{BindMount, SandboxSpec, StdioMode};
use std::collections::HashMap;
use std::path::Path;

const DENO_RUN_FLAGS: &[&str] = &[
    "--no-check=remote",
    "--allow-all",
    "--watch",
    "--no-clear-screen",
    "--no-npm",
];

/// Commands executed inside the relay for one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCommands {
    /// One-shot dependency download and compile
    pub cache: Vec<String>,
    /// Long-running watcher serving the function
    pub run: Vec<String>,
}

fn labels(config: &ProjectConfig) -> HashMap<String, String> {
    HashMap::from([
        (PROJECT_LABEL.to_string(), config.project_id.clone()),
        (MANAGED_LABEL.to_string(), "true".to_string()),
    ])
}

/// Functions directory, plus the custom import map when one was resolved
fn source_mounts(paths: &ProjectPaths, resolved: &ResolvedConfig) -> Vec<BindMount> {
    let mut mounts = vec![BindMount::readonly(
        paths.functions_dir(),
        SANDBOX_FUNCTIONS_DIR,
    )];
    if let Some(import_map) = &resolved.import_map {
        mounts.push(BindMount::readonly(import_map, SANDBOX_CUSTOM_IMPORT_MAP));
    }
    mounts
}

/// Detached relay container for serving a single function
pub fn relay_spec(
    config: &ProjectConfig,
    paths: &ProjectPaths,
    resolved: &ResolvedConfig,
    user: &UserEnv,
) -> SandboxSpec {
    SandboxSpec {
        image: config.edge_runtime.relay_image.clone(),
        env: relay_container_env(config, resolved.verify_jwt, user),
        command: None,
        mounts: source_mounts(paths, resolved),
        extra_hosts: vec![HOST_GATEWAY_ALIAS.to_string()],
        network: Some(config.network()),
        labels: labels(config),
        stdio: StdioMode::Detached,
    }
}

/// Persistent runtime container serving every function, with a writable module cache
pub fn runtime_spec(
    config: &ProjectConfig,
    paths: &ProjectPaths,
    resolved: &ResolvedConfig,
    user: &UserEnv,
    cache_dir: &Path,
) -> SandboxSpec {
    let mut mounts = source_mounts(paths, resolved);
    mounts.push(BindMount::read_write(cache_dir, SANDBOX_DENO_CACHE_DIR));

    SandboxSpec {
        image: config.edge_runtime.runtime_image.clone(),
        env: runtime_container_env(config, resolved.verify_jwt, user),
        command: Some(serve_all_command(resolved)),
        mounts,
        extra_hosts: Vec::new(),
        network: Some(config.network()),
        labels: labels(config),
        stdio: StdioMode::Interactive,
    }
}

/// `start --dir <functions> -p 8081 [--import-map=<custom>]`
pub fn serve_all_command(resolved: &ResolvedConfig) -> Vec<String> {
    let mut command = vec![
        "start".to_string(),
        "--dir".to_string(),
        SANDBOX_FUNCTIONS_DIR.to_string(),
        "-p".to_string(),
        RUNTIME_PORT.to_string(),
    ];
    if resolved.import_map.is_some() {
        command.push(import_map_flag(SANDBOX_CUSTOM_IMPORT_MAP));
    }
    command
}

/// Cache and run commands for `slug`.
///
/// A custom import map is referenced at its mount point; otherwise the function's
/// own `import_map.json` is used when it exists on the host.
pub fn function_commands(
    slug: &str,
    paths: &ProjectPaths,
    resolved: &ResolvedConfig,
) -> Result<FunctionCommands> {
    let (host_map, sandbox_map) = match &resolved.import_map {
        Some(custom) => (custom.clone(), SANDBOX_CUSTOM_IMPORT_MAP.to_string()),
        None => (
            paths.function_import_map(slug),
            format!("{}/{}/{}", SANDBOX_FUNCTIONS_DIR, slug, IMPORT_MAP_FILE),
        ),
    };

    let flag = file_present(&host_map)
        .map_err(|source| ServeError::ImportMapCheck {
            slug: slug.to_string(),
            source,
        })?
        .then(|| import_map_flag(&sandbox_map));

    // Always a forward-slash path: the sandbox is Linux
    let entrypoint = format!("{}/{}/{}", SANDBOX_FUNCTIONS_DIR, slug, FUNCTION_ENTRYPOINT);

    let mut cache = vec!["deno".to_string(), "cache".to_string()];
    cache.extend(flag.clone());
    cache.push(entrypoint.clone());

    let mut run = vec!["deno".to_string(), "run".to_string()];
    run.extend(DENO_RUN_FLAGS.iter().map(|f| f.to_string()));
    run.extend(flag);
    run.push(entrypoint);

    Ok(FunctionCommands { cache, run })
}

fn import_map_flag(sandbox_path: &str) -> String {
    format!("--import-map={}", sandbox_path)
}
