// ABOUTME: CLI commands for serving edge functions
// ABOUTME: Maps flags onto a serve request and turns Ctrl-C into cancellation

use anyhow::{Context, Result};
use clap::Subcommand;
use fnserve_config::{ProjectConfig, ProjectPaths};
use fnserve_functions::{FunctionServer, ServeRequest};
use fnserve_sandbox::DockerEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Subcommand, Debug)]
pub enum FunctionsCommands {
    /// Serve a function locally
    Serve {
        /// Function name
        #[arg(required_unless_present = "all")]
        slug: Option<String>,

        /// Path to an env file to be populated to the function environment
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Disable JWT verification for the function
        #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
        no_verify_jwt: Option<bool>,

        /// Path to import map file
        #[arg(long)]
        import_map: Option<PathBuf>,

        /// Serve all functions
        #[arg(long, conflicts_with = "slug")]
        all: bool,
    },
}

impl FunctionsCommands {
    pub async fn execute(self) -> Result<()> {
        serve_command(self.into_request()).await
    }

    fn into_request(self) -> ServeRequest {
        match self {
            FunctionsCommands::Serve {
                slug,
                env_file,
                no_verify_jwt,
                import_map,
                all,
            } => ServeRequest {
                slug: if all { None } else { slug },
                env_file,
                no_verify_jwt,
                import_map,
            },
        }
    }
}

async fn serve_command(request: ServeRequest) -> Result<()> {
    let paths = ProjectPaths::from_cwd().context("Failed to determine working directory")?;
    let config = ProjectConfig::load(&paths)?;
    let engine = Arc::new(DockerEngine::new()?);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let server = FunctionServer::new(engine, config, paths);
    let result = server.run(request, cancel).await;

    interrupt.abort();
    Ok(result?)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            debug!("Interrupt received");
            cancel.cancel();
        }
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
}
