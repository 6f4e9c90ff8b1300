use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::SandboxError;

/// Label put on every container packforge creates.
pub const MANAGED_LABEL: &str = "packforge.managed";

/// Fully resolved description of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Docker bind strings, `host:container:rw`.
    pub binds: Vec<String>,
    pub privileged: bool,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
}

/// Abstraction over the container daemon.
/// Real implementation: [`crate::DockerEngine`]. Test double: `ScriptedEngine`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the daemon answers.
    async fn ping(&self) -> Result<(), SandboxError>;

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    /// Build `image` from the recipe directory `context`.
    async fn build_image(&self, image: &str, context: &Path) -> Result<(), SandboxError>;

    /// Create a container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Start the container, write its combined output to `log`, and return
    /// the exit code once it stops.
    async fn start_and_wait(&self, id: &str, log: &Path) -> Result<i64, SandboxError>;

    /// Force-remove the container.
    async fn remove(&self, id: &str) -> Result<(), SandboxError>;
}
