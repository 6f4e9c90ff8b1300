use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::engine::{ContainerEngine, ContainerSpec, MANAGED_LABEL};
use crate::error::SandboxError;

/// Directory under the workspace where sandbox logs land.
const LOG_DIR: &str = "logs";

/// Configuration for the sandbox runner.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory holding one recipe directory per image name.
    pub recipes: PathBuf,
    /// Upper bound for a single container run.
    pub timeout: Duration,
    /// Extra `KEY=value` pairs passed to every container.
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            recipes: PathBuf::from("dockerfiles"),
            timeout: Duration::from_secs(3600),
            env: HashMap::new(),
        }
    }
}

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

/// What a unit asks the sandbox to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub image: String,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    /// Needed for chroot builds and extracting root-owned files.
    pub privileged: bool,
    /// Stem of the log file under `<workspace>/logs/`.
    pub log_name: String,
    pub working_dir: Option<String>,
}

impl SandboxSpec {
    pub fn new<I, S>(image: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let image = image.into();
        Self {
            log_name: image.clone(),
            image,
            command: command.into_iter().map(Into::into).collect(),
            mounts: Vec::new(),
            privileged: false,
            working_dir: None,
        }
    }

    pub fn mount(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
        });
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn log_name(mut self, name: impl Into<String>) -> Self {
        self.log_name = name.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Result of one sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutcome {
    pub exit_code: i64,
    /// Log file, relative to the workspace root.
    pub log_path: PathBuf,
    pub timed_out: bool,
}

impl SandboxOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Last `lines` lines of the log, or an empty string if it cannot be read.
    pub async fn log_tail(&self, workspace: &Path, lines: usize) -> String {
        let content = tokio::fs::read_to_string(workspace.join(&self.log_path))
            .await
            .unwrap_or_default();
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs commands in disposable containers.
///
/// Shared by every concurrent run in the process. Image preparation is single
/// flight: concurrent requests for the same image wait for one build.
pub struct Sandbox {
    engine: Arc<dyn ContainerEngine>,
    config: SandboxConfig,
    images: DashMap<String, Arc<OnceCell<()>>>,
    reachable: OnceCell<()>,
}

impl Sandbox {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: SandboxConfig) -> Self {
        Self {
            engine,
            config,
            images: DashMap::new(),
            reachable: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Names of images known to be ready, in no particular order.
    pub fn ready_images(&self) -> Vec<String> {
        self.images
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn ensure_reachable(&self) -> Result<(), SandboxError> {
        self.reachable
            .get_or_try_init(|| async { self.engine.ping().await })
            .await
            .map(|_| ())
    }

    /// Make sure `image` exists locally, building it from its recipe at most
    /// once per process. A failed build is retried by the next caller.
    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        self.ensure_reachable().await?;

        let cell = {
            let entry = self.images.entry(image.to_string()).or_default();
            Arc::clone(entry.value())
        };

        cell.get_or_try_init(|| async {
            if self.engine.image_exists(image).await? {
                return Ok(());
            }
            let recipe = self.config.recipes.join(image);
            if !recipe.join("Dockerfile").is_file() {
                return Err(SandboxError::RecipeMissing {
                    image: image.to_string(),
                    path: recipe,
                });
            }
            self.engine.build_image(image, &recipe).await?;
            info!(image, "sandbox image ready");
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Run `spec` with its log written under `<workspace>/logs/`.
    ///
    /// The container is removed whether the command succeeds, fails, or the
    /// engine errors part way through.
    pub async fn run(
        &self,
        spec: &SandboxSpec,
        workspace: &Path,
    ) -> Result<SandboxOutcome, SandboxError> {
        self.ensure_image(&spec.image).await?;

        let mut binds = Vec::with_capacity(spec.mounts.len());
        for mount in &spec.mounts {
            let host = tokio::fs::canonicalize(&mount.host)
                .await
                .map_err(|_| SandboxError::MountMissing(mount.host.clone()))?;
            binds.push(format!("{}:{}:rw", host.display(), mount.container));
        }

        let log_dir = workspace.join(LOG_DIR);
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(|source| SandboxError::Log {
                path: log_dir.clone(),
                source,
            })?;
        let log_path = PathBuf::from(LOG_DIR).join(format!("{}.log", spec.log_name));

        let container = ContainerSpec {
            name: format!("packforge-{}", uuid::Uuid::new_v4()),
            image: spec.image.clone(),
            command: spec.command.clone(),
            binds,
            privileged: spec.privileged,
            env: self
                .config
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
            working_dir: spec.working_dir.clone(),
        };

        if spec.privileged {
            info!(image = %spec.image, command = ?spec.command, "starting privileged sandbox");
        } else {
            info!(image = %spec.image, command = ?spec.command, "starting sandbox");
        }

        let id = self.engine.create(&container).await?;
        let absolute_log = workspace.join(&log_path);
        let waited = tokio::time::timeout(
            self.config.timeout,
            self.engine.start_and_wait(&id, &absolute_log),
        )
        .await;
        let removed = self.engine.remove(&id).await;

        let outcome = match waited {
            Ok(result) => SandboxOutcome {
                exit_code: result?,
                log_path,
                timed_out: false,
            },
            Err(_) => {
                warn!(image = %spec.image, timeout = ?self.config.timeout, "sandbox timed out");
                SandboxOutcome {
                    exit_code: -1,
                    log_path,
                    timed_out: true,
                }
            }
        };
        removed?;

        info!(image = %spec.image, exit_code = outcome.exit_code, "sandbox finished");
        Ok(outcome)
    }
}
