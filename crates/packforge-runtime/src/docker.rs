use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptions,
};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::engine::{ContainerEngine, ContainerSpec};
use crate::error::SandboxError;

/// Container engine backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    /// CLI used for image builds (`docker` unless overridden).
    docker_cmd: String,
}

impl DockerEngine {
    /// Connect to the daemon using the platform defaults (`DOCKER_HOST` or
    /// the local socket).
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DaemonUnreachable(e.to_string()))?;
        let docker_cmd = std::env::var("DOCKER_CMD").unwrap_or_else(|_| "docker".to_string());
        Ok(Self { docker, docker_cmd })
    }

    /// Access the underlying client, e.g. for inspection in tests.
    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::DaemonUnreachable(e.to_string()))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, image: &str, context: &Path) -> Result<(), SandboxError> {
        info!(image, context = %context.display(), "building sandbox image");
        let output = tokio::process::Command::new(&self.docker_cmd)
            .args(["build", "--quiet", "-t", image])
            .arg(context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SandboxError::ImageBuild {
                image: image.to_string(),
                message: format!("failed to run {}: {}", self.docker_cmd, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::ImageBuild {
                image: image.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            working_dir: spec.working_dir.clone(),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                privileged: Some(spec.privileged),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.docker.create_container(Some(options), body).await?;
        debug!(id = %response.id, name = %spec.name, "container created");
        Ok(response.id)
    }

    async fn start_and_wait(&self, id: &str, log: &Path) -> Result<i64, SandboxError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;

        let mut file = tokio::fs::File::create(log)
            .await
            .map_err(|source| SandboxError::Log {
                path: log.to_path_buf(),
                source,
            })?;

        let options = LogsOptionsBuilder::default()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .tail("all")
            .build();
        let mut logs = self.docker.logs(id, Some(options));
        while let Some(chunk) = logs.next().await {
            let chunk = chunk?;
            file.write_all(&chunk.into_bytes())
                .await
                .map_err(|source| SandboxError::Log {
                    path: log.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| SandboxError::Log {
            path: log.to_path_buf(),
            source,
        })?;

        let mut exit_code = 0;
        let mut wait = self.docker.wait_container(id, None::<WaitContainerOptions>);
        while let Some(result) = wait.next().await {
            match result {
                Ok(response) => exit_code = response.status_code,
                // bollard reports a non-zero exit as an error carrying the code.
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = code
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(exit_code)
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();
        self.docker.remove_container(id, Some(options)).await?;
        debug!(id, "container removed");
        Ok(())
    }
}
