// ABOUTME: Docker implementation of the container engine
// ABOUTME: Uses bollard to create, exec into, attach to, wait on and remove sandbox containers

use super::{ContainerEngine, OutputChunk, OutputStream, SandboxSpec, StdioMode};
use crate::{Result, SandboxError};
use async_trait::async_trait;
use bollard::{
    container::{
        AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
        InspectContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        WaitContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::HostConfig,
    Docker,
};
use futures::{future, StreamExt};
use std::time::Duration;
use tracing::{debug, info};

pub struct DockerEngine {
    client: Docker,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerEngine {
    /// Connect with default settings and a 10 minute pull timeout
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| SandboxError::Connection(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    pub fn with_client(client: Docker) -> Self {
        Self::with_client_and_timeout(client, Duration::from_secs(600))
    }

    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            pull_timeout: timeout,
        }
    }

    /// Convert a sandbox spec to bollard's container config
    fn to_bollard_config(spec: &SandboxSpec) -> Config<String> {
        let binds: Vec<String> = spec.mounts.iter().map(|m| m.to_bind()).collect();

        let host_config = HostConfig {
            binds: Some(binds),
            extra_hosts: if spec.extra_hosts.is_empty() {
                None
            } else {
                Some(spec.extra_hosts.clone())
            },
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let interactive = spec.stdio == StdioMode::Interactive;

        Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: spec.command.clone(),
            labels: Some(spec.labels.clone()),
            tty: Some(interactive),
            open_stdin: Some(interactive),
            attach_stdin: Some(interactive),
            attach_stdout: Some(interactive),
            attach_stderr: Some(interactive),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Map a bollard error, keeping 404s distinguishable
fn engine_error(operation: &'static str, error: BollardError) -> SandboxError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => SandboxError::NotFound(message),
        other => SandboxError::Engine {
            operation,
            message: other.to_string(),
        },
    }
}

fn to_chunk(output: LogOutput) -> Option<OutputChunk> {
    match output {
        LogOutput::StdOut { message } => Some(OutputChunk::stdout(message.to_vec())),
        LogOutput::StdErr { message } => Some(OutputChunk::stderr(message.to_vec())),
        LogOutput::Console { message } => Some(OutputChunk::console(message.to_vec())),
        LogOutput::StdIn { .. } => None,
    }
}

fn into_output_stream<S>(output: S, operation: &'static str) -> OutputStream
where
    S: futures::Stream<Item = std::result::Result<LogOutput, BollardError>> + Send + 'static,
{
    output
        .filter_map(move |item| {
            future::ready(match item {
                Ok(log) => to_chunk(log).map(Ok),
                Err(e) => Some(Err(engine_error(operation, e))),
            })
        })
        .boxed()
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn is_running(&self, name: &str) -> Result<bool> {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(engine_error("inspect container", e)),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(SandboxError::ImagePull {
                image: image.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = Box::pin(stream);
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                let info = result.map_err(|e| SandboxError::ImagePull {
                    image: image.to_string(),
                    message: e.to_string(),
                })?;
                if let Some(status) = &info.status {
                    if status != &last_status {
                        debug!("Pull status: {}", status);
                        last_status = status.clone();
                    }
                }
                if let Some(error) = info.error {
                    return Err(SandboxError::ImagePull {
                        image: image.to_string(),
                        message: error,
                    });
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SandboxError::ImagePull {
                image: image.to_string(),
                message: format!("timed out after {:?}", self.pull_timeout),
            }),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        debug!("Removing container {}", name);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(name, Some(options))
            .await
            .map_err(|e| engine_error("remove container", e))
    }

    async fn create_container(&self, name: &str, spec: &SandboxSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await
            .map_err(|e| engine_error("create container", e))?;

        for warning in &response.warnings {
            debug!("Docker warning for {}: {}", name, warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error("start container", e))
    }

    async fn create_exec(
        &self,
        container: &str,
        env: &[String],
        command: &[String],
    ) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            env: Some(env.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container, options)
            .await
            .map_err(|e| engine_error("create exec", e))?;

        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream> {
        let started = self
            .client
            .start_exec(exec_id, None::<StartExecOptions>)
            .await
            .map_err(|e| engine_error("start exec", e))?;

        match started {
            StartExecResults::Attached { output, .. } => {
                Ok(into_output_stream(output, "read exec output"))
            }
            StartExecResults::Detached => Err(SandboxError::Detached(exec_id.to_string())),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self
            .client
            .inspect_exec(exec_id)
            .await
            .map_err(|e| engine_error("inspect exec", e))?;

        Ok(inspect.exit_code)
    }

    async fn attach_container(&self, container: &str) -> Result<OutputStream> {
        let AttachContainerResults { output, .. } = self
            .client
            .attach_container(container, Some(attach_options()))
            .await
            .map_err(|e| engine_error("attach container", e))?;

        Ok(into_output_stream(output, "read container output"))
    }

    async fn wait_container(&self, container: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = Box::pin(self.client.wait_container(container, Some(options)));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_error("wait for container", e)),
            None => Err(SandboxError::Engine {
                operation: "wait for container",
                message: "wait stream closed without a status".to_string(),
            }),
        }
    }
}

/// Output-only attachment. Operator stdin is not forwarded to the sandbox.
fn attach_options() -> AttachContainerOptions<String> {
    AttachContainerOptions {
        stdin: Some(false),
        stdout: Some(true),
        stderr: Some(true),
        stream: Some(true),
        logs: Some(true),
        detach_keys: None,
    }
}
