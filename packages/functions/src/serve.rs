// ABOUTME: Entry point that serves one function through the relay, or all functions through the runtime
// ABOUTME: Validates everything up front, then restarts the sandbox and streams until done or cancelled

use crate::command::{function_commands, relay_spec, runtime_spec, FunctionCommands};
use crate::env::{function_cache_env, function_run_env, parse_env_file, UserEnv};
use crate::resolver::{resolve_all, resolve_function, ServeRequest};
use crate::{Result, ServeError};
use colored::Colorize;
use fnserve_config::{ProjectConfig, ProjectPaths};
use fnserve_sandbox::{
    CancellationWatcher, Console, ContainerEngine, SandboxHandle, SandboxLifecycle, WaitOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct FunctionServer {
    engine: Arc<dyn ContainerEngine>,
    config: ProjectConfig,
    paths: ProjectPaths,
    console: Console,
    cache_dir: Option<PathBuf>,
}

impl FunctionServer {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: ProjectConfig, paths: ProjectPaths) -> Self {
        Self {
            engine,
            config,
            paths,
            console: Console::stdio(),
            cache_dir: None,
        }
    }

    /// Send operator output somewhere other than the process's stdio
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Host module cache for the runtime, instead of the per-user default
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Serve until the function process exits or `cancel` fires.
    ///
    /// Configuration problems are reported before any container is touched.
    /// Output has already been streamed to the console when this returns.
    pub async fn run(&self, request: ServeRequest, cancel: CancellationToken) -> Result<()> {
        let request = request.normalized();
        match request.slug.clone() {
            Some(slug) => self.serve_function(&slug, &request, cancel).await,
            None => self.serve_all(&request, cancel).await,
        }
    }

    async fn serve_function(
        &self,
        slug: &str,
        request: &ServeRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        let resolved = resolve_function(slug, request, &self.config, &self.paths)?;
        let user = self.user_env(request)?;
        let commands = function_commands(slug, &self.paths, &resolved)?;
        self.ensure_database_running().await?;

        let lifecycle = SandboxLifecycle::new(self.engine.clone(), self.config.relay_container());
        let spec = relay_spec(&self.config, &self.paths, &resolved, &user);
        let handle = lifecycle.restart(&spec).await?;
        let watcher = CancellationWatcher::spawn(lifecycle.clone(), cancel.clone());

        let dir = self.display_path(&self.paths.function_dir(slug));
        let served = self
            .serve_relay(&lifecycle, &handle, &commands, &user, &dir)
            .await;
        self.conclude(served, watcher, &cancel, &dir).await
    }

    async fn serve_relay(
        &self,
        lifecycle: &SandboxLifecycle,
        handle: &SandboxHandle,
        commands: &FunctionCommands,
        user: &UserEnv,
        dir: &str,
    ) -> Result<()> {
        self.console
            .announce(&format!("Starting {}", dir.bold()))
            .await?;
        lifecycle
            .exec_once(handle, &function_cache_env(user), &commands.cache)
            .await?;

        self.console
            .announce(&format!("Serving {}", dir.bold()))
            .await?;
        let env = function_run_env(&self.config, user);
        lifecycle
            .exec_and_stream(handle, &env, &commands.run, &self.console)
            .await?;
        Ok(())
    }

    async fn serve_all(&self, request: &ServeRequest, cancel: CancellationToken) -> Result<()> {
        let resolved = resolve_all(request, &self.paths)?;
        let user = self.user_env(request)?;
        let cache_dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => self.paths.deno_cache_dir()?,
        };
        self.ensure_database_running().await?;

        let lifecycle = SandboxLifecycle::new(self.engine.clone(), self.config.relay_container());
        let spec = runtime_spec(&self.config, &self.paths, &resolved, &user, &cache_dir);
        let handle = lifecycle.restart(&spec).await?;
        let watcher = CancellationWatcher::spawn(lifecycle.clone(), cancel.clone());

        let dir = self.display_path(&self.paths.functions_dir());
        let served = self.serve_runtime(&lifecycle, &handle, &cancel, &dir).await;
        self.conclude(served, watcher, &cancel, &dir).await
    }

    async fn serve_runtime(
        &self,
        lifecycle: &SandboxLifecycle,
        handle: &SandboxHandle,
        cancel: &CancellationToken,
        dir: &str,
    ) -> Result<()> {
        self.console
            .announce(&format!("Serving {}", dir.bold()))
            .await?;

        match lifecycle.attach_and_wait(handle, cancel, &self.console).await? {
            WaitOutcome::Exited(0) | WaitOutcome::Cancelled => {}
            WaitOutcome::Exited(code) => warn!("Edge runtime exited with code {}", code),
        }
        Ok(())
    }

    /// Release the watcher and report the run's outcome.
    ///
    /// Failures observed after cancellation are the sandbox going away, not errors.
    async fn conclude(
        &self,
        served: Result<()>,
        watcher: CancellationWatcher,
        cancel: &CancellationToken,
        dir: &str,
    ) -> Result<()> {
        match served {
            Err(e) if !cancel.is_cancelled() => {
                watcher.dismiss().await;
                Err(e)
            }
            outcome => {
                if let Err(e) = outcome {
                    debug!("Serve interrupted by cancellation: {}", e);
                }
                let trigger = watcher.finish().await;
                info!("Stopped serving {} ({:?})", dir, trigger);
                self.console
                    .announce(&format!("Stopped serving {}", dir.bold()))
                    .await?;
                Ok(())
            }
        }
    }

    fn user_env(&self, request: &ServeRequest) -> Result<UserEnv> {
        let path = request
            .env_file
            .as_deref()
            .map(|p| self.paths.resolve_host(p));
        parse_env_file(path.as_deref())
    }

    /// Read-only check; runs after configuration has been validated
    async fn ensure_database_running(&self) -> Result<()> {
        let container = self.config.db_container();
        if self.engine.is_running(&container).await? {
            Ok(())
        } else {
            Err(ServeError::DatabaseNotRunning { container })
        }
    }

    /// Path relative to the project root, as the operator typed it
    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.paths.root())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}
