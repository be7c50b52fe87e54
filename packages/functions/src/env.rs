// ABOUTME: Environment assembly for function sandboxes
// ABOUTME: Parses the user env file and places the reserved system block ahead of it

use crate::{Result, ServeError};
use fnserve_config::constants::{
    DENO_ORIGIN, JWT_SECRET, RELAY_ORIGIN, RESERVED_ENV_PREFIX, SUPABASE_ANON_KEY,
    SUPABASE_DB_URL, SUPABASE_SERVICE_ROLE_KEY, SUPABASE_URL, VERIFY_JWT,
};
use fnserve_config::ProjectConfig;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Variables supplied through `--env-file`, unique by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEnv {
    vars: BTreeMap<String, String>,
}

impl UserEnv {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// `NAME=VALUE` strings
    pub fn assignments(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(name, value)| assignment(name, value))
            .collect()
    }
}

/// Parse an optional env file into the user block.
///
/// No path yields an empty block. Names using the reserved prefix are rejected.
pub fn parse_env_file(path: Option<&Path>) -> Result<UserEnv> {
    let Some(path) = path else {
        return Ok(UserEnv::default());
    };

    std::fs::metadata(path).map_err(|source| ServeError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |source| ServeError::EnvParse {
        path: path.to_path_buf(),
        source,
    };

    let mut vars = BTreeMap::new();
    for item in dotenvy::from_path_iter(path).map_err(parse_error)? {
        let (name, value) = item.map_err(parse_error)?;
        if name.starts_with(RESERVED_ENV_PREFIX) {
            return Err(ServeError::ReservedEnvName(name));
        }
        vars.insert(name, value);
    }

    debug!("Loaded {} variables from {}", vars.len(), path.display());
    Ok(UserEnv { vars })
}

fn assignment(name: &str, value: &str) -> String {
    format!("{}={}", name, value)
}

fn verify_jwt(verify: bool) -> String {
    assignment(VERIFY_JWT, if verify { "true" } else { "false" })
}

/// Stack endpoints and keys a function reaches the rest of the project with
fn stack_block(config: &ProjectConfig) -> Vec<String> {
    vec![
        assignment(SUPABASE_URL, &config.gateway_url()),
        assignment(SUPABASE_ANON_KEY, &config.auth.anon_key),
        assignment(SUPABASE_SERVICE_ROLE_KEY, &config.auth.service_role_key),
        assignment(SUPABASE_DB_URL, &config.db_url()),
    ]
}

/// System block followed by the user block. Duplicates are kept verbatim.
fn assemble(mut system: Vec<String>, user: &UserEnv) -> Vec<String> {
    system.extend(user.assignments());
    system
}

/// Environment of the single-function relay container
pub fn relay_container_env(config: &ProjectConfig, verify: bool, user: &UserEnv) -> Vec<String> {
    let system = vec![
        assignment(JWT_SECRET, &config.auth.jwt_secret),
        assignment(DENO_ORIGIN, RELAY_ORIGIN),
        verify_jwt(verify),
    ];
    assemble(system, user)
}

/// Environment of the long-running function process inside the relay
pub fn function_run_env(config: &ProjectConfig, user: &UserEnv) -> Vec<String> {
    assemble(stack_block(config), user)
}

/// Environment of the one-shot dependency cache exec
pub fn function_cache_env(user: &UserEnv) -> Vec<String> {
    user.assignments()
}

/// Environment of the persistent multi-function runtime container
pub fn runtime_container_env(config: &ProjectConfig, verify: bool, user: &UserEnv) -> Vec<String> {
    let mut system = vec![assignment(JWT_SECRET, &config.auth.jwt_secret)];
    system.extend(stack_block(config));
    system.push(verify_jwt(verify));
    assemble(system, user)
}
