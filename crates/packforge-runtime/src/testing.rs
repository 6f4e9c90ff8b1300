//! In-memory container engine for tests.
//!
//! `ScriptedEngine` keeps no daemon state beyond what tests assert on: which
//! images exist, how many builds ran, which containers are still alive. A
//! script closure decides each container's exit code and output, and may
//! write files into the bound host directories to stand in for the real
//! command.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, ContainerSpec};
use crate::error::SandboxError;

/// What a scripted container does when started.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub exit_code: i64,
    pub output: String,
    pub delay: Option<Duration>,
}

impl ScriptedRun {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Script = Arc<dyn Fn(&ContainerSpec) -> ScriptedRun + Send + Sync>;

/// Container engine that never leaves the process.
pub struct ScriptedEngine {
    images: Mutex<HashSet<String>>,
    containers: Mutex<HashMap<String, ContainerSpec>>,
    history: Mutex<Vec<ContainerSpec>>,
    script: Script,
    build_delay: Duration,
    build_failures: AtomicUsize,
    reachable: bool,
    fail_start: bool,
    pub builds: AtomicUsize,
    pub created: AtomicUsize,
    pub removed: AtomicUsize,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            images: Mutex::new(HashSet::new()),
            containers: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            script: Arc::new(|_| ScriptedRun::exit(0)),
            build_delay: Duration::ZERO,
            build_failures: AtomicUsize::new(0),
            reachable: true,
            fail_start: false,
            builds: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
        }
    }
}

impl ScriptedEngine {
    /// Engine where the given images already exist.
    pub fn with_images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let engine = Self::default();
        if let Ok(mut known) = engine.images.lock() {
            known.extend(images.into_iter().map(Into::into));
        }
        engine
    }

    pub fn script<F>(mut self, script: F) -> Self
    where
        F: Fn(&ContainerSpec) -> ScriptedRun + Send + Sync + 'static,
    {
        self.script = Arc::new(script);
        self
    }

    pub fn build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    /// Fail the next `count` image builds.
    pub fn fail_builds(self, count: usize) -> Self {
        self.build_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Containers created but not yet removed.
    pub fn live_containers(&self) -> usize {
        self.containers.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Every container spec created so far, in creation order.
    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

/// Host path bound to `container_path` in `spec`, if any.
pub fn host_path(spec: &ContainerSpec, container_path: &str) -> Option<PathBuf> {
    spec.binds.iter().find_map(|bind| {
        let mut parts = bind.rsplitn(3, ':');
        let _mode = parts.next()?;
        let target = parts.next()?;
        let host = parts.next()?;
        (target == container_path).then(|| PathBuf::from(host))
    })
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn ping(&self) -> Result<(), SandboxError> {
        if self.reachable {
            Ok(())
        } else {
            Err(SandboxError::DaemonUnreachable(
                "scripted engine is offline".into(),
            ))
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        Ok(self
            .images
            .lock()
            .map(|images| images.contains(image))
            .unwrap_or(false))
    }

    async fn build_image(&self, image: &str, _context: &Path) -> Result<(), SandboxError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.build_delay.is_zero() {
            tokio::time::sleep(self.build_delay).await;
        }
        let failing = self
            .build_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SandboxError::ImageBuild {
                image: image.to_string(),
                message: "scripted failure".into(),
            });
        }
        if let Ok(mut images) = self.images.lock() {
            images.insert(image.to_string());
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let id = format!("scripted-{}", self.created.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut containers) = self.containers.lock() {
            containers.insert(id.clone(), spec.clone());
        }
        if let Ok(mut history) = self.history.lock() {
            history.push(spec.clone());
        }
        Ok(id)
    }

    async fn start_and_wait(&self, id: &str, log: &Path) -> Result<i64, SandboxError> {
        if self.fail_start {
            return Err(SandboxError::Runtime("scripted start failure".into()));
        }
        let spec = self
            .containers
            .lock()
            .ok()
            .and_then(|c| c.get(id).cloned())
            .ok_or_else(|| SandboxError::Runtime(format!("no such container: {}", id)))?;

        let run = (self.script)(&spec);
        tokio::fs::write(log, run.output.as_bytes())
            .await
            .map_err(|source| SandboxError::Log {
                path: log.to_path_buf(),
                source,
            })?;
        if let Some(delay) = run.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(run.exit_code)
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        if let Ok(mut containers) = self.containers.lock() {
            containers.remove(id);
        }
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_path_finds_bind_by_container_path() {
        let spec = ContainerSpec {
            binds: vec![
                "/ws/repository:/tmp/repository:rw".into(),
                "/ws/build:/tmp/build:rw".into(),
            ],
            ..Default::default()
        };
        assert_eq!(
            host_path(&spec, "/tmp/build"),
            Some(PathBuf::from("/ws/build"))
        );
        assert_eq!(host_path(&spec, "/tmp/other"), None);
    }
}
