//! Build service: one request, every target of its matrix.
//!
//! Pipelines for the targets of a request run concurrently, at most
//! `service.max_parallel` at a time, and share one [`Sandbox`]. Each run gets
//! its own workspace and data store. When a [`Director`] is attached, every
//! finished run is published and reported on before the service returns.

use std::sync::Arc;

use packforge_common::BuildTarget;
use packforge_runtime::Sandbox;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::director::{Director, DirectorOutcome};
use crate::errors::PipelineError;
use crate::matrix::resolve_matrix;
use crate::pipeline::units::{ProjectConfig, ProjectConfigUnit};
use crate::pipeline::{BuildRequest, Pipeline, PipelineDeps, RunReport, TaskList, Unit};
use crate::repository::Repository;
use crate::settings::Settings;

/// A finished run and what the director did with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRun {
    pub report: RunReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<DirectorOutcome>,
}

pub struct BuildService {
    settings: Arc<Settings>,
    sandbox: Arc<Sandbox>,
    director: Option<Arc<Director>>,
}

impl BuildService {
    pub fn new(settings: Arc<Settings>, sandbox: Arc<Sandbox>) -> Self {
        Self {
            settings,
            sandbox,
            director: None,
        }
    }

    pub fn with_director(mut self, director: Director) -> Self {
        self.director = Some(Arc::new(director));
        self
    }

    /// Targets for `repository`: the single `distribution` when given,
    /// otherwise the matrix of its packaging branches.
    pub async fn targets(
        &self,
        repository: &dyn Repository,
        distribution: Option<&str>,
    ) -> Result<Vec<BuildTarget>, PipelineError> {
        if let Some(distribution) = distribution {
            return Ok(vec![BuildTarget::new(
                distribution,
                self.settings.matrix.architecture.as_str(),
            )]);
        }
        let branches = repository.references().await?;
        Ok(resolve_matrix(&branches, &self.settings.matrix))
    }

    /// Build `request` for every target. Reports come back in target order.
    pub async fn build(
        &self,
        request: BuildRequest,
        repository: Arc<dyn Repository>,
        distribution: Option<&str>,
    ) -> Result<Vec<ServiceRun>, PipelineError> {
        let targets = self.targets(repository.as_ref(), distribution).await?;
        info!(
            package = %request.package.name,
            targets = targets.len(),
            max_parallel = self.settings.service.max_parallel,
            "building matrix"
        );

        let tasks = Arc::new(TaskList::for_package(request.package.package_type));
        let semaphore = Arc::new(Semaphore::new(self.settings.service.max_parallel.max(1)));
        let mut set = JoinSet::new();

        for (index, target) in targets.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Other(e.into()))?;
            let deps = PipelineDeps {
                settings: Arc::clone(&self.settings),
                sandbox: Arc::clone(&self.sandbox),
                repository: Arc::clone(&repository),
            };
            let pipeline = Pipeline::new(request.clone(), target, deps);
            let tasks = Arc::clone(&tasks);
            let director = self.director.clone();

            set.spawn(async move {
                let _permit = permit;
                let report = pipeline.execute(&tasks).await;
                let direction = match director {
                    Some(director) => {
                        let config: ProjectConfig = report
                            .output(ProjectConfigUnit::NAME)
                            .unwrap_or_default();
                        Some(director.direct(&report, &config).await)
                    }
                    None => None,
                };
                (index, ServiceRun { report, direction })
            });
        }

        let mut runs = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(err) => warn!(error = %err, "pipeline task did not finish"),
            }
        }
        runs.sort_by_key(|(index, _)| *index);
        Ok(runs.into_iter().map(|(_, run)| run).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RepositoryHandle;
    use crate::repository::DirectorySource;
    use packforge_common::{PackageIdentity, PackageType};
    use packforge_runtime::SandboxConfig;
    use packforge_runtime::testing::{ScriptedEngine, ScriptedRun, host_path};
    use std::path::Path;
    use std::time::Duration;

    const CHANGELOG: &str = "com.github.someone.lib (1.0.0) juno; urgency=medium\n\n  * Release\n\n -- Someone <someone@example.com>  Mon, 05 Oct 2026 12:00:00 +0000\n";
    const CONTROL: &str = "Source: com.github.someone.lib\nMaintainer: Someone <someone@example.com>\n\nPackage: com.github.someone.lib\nArchitecture: any\n";

    fn source(root: &Path) -> std::path::PathBuf {
        let source = root.join("source");
        std::fs::create_dir_all(source.join("debian")).unwrap();
        std::fs::write(source.join("debian/changelog"), CHANGELOG).unwrap();
        std::fs::write(source.join("debian/control"), CONTROL).unwrap();
        source
    }

    fn service(root: &Path, engine: Arc<ScriptedEngine>, max_parallel: usize) -> BuildService {
        let mut settings = Settings::default();
        settings.service.workspace_root = root.join("work");
        settings.service.artifact_dir = root.join("artifacts");
        settings.service.max_parallel = max_parallel;
        BuildService::new(
            Arc::new(settings),
            Arc::new(Sandbox::new(engine, SandboxConfig::default())),
        )
    }

    fn request() -> BuildRequest {
        BuildRequest {
            repository: RepositoryHandle {
                url: "https://github.com/someone/lib.git".into(),
                reference: "1.0.0".into(),
            },
            package: PackageIdentity::new("com.github.someone.lib", "1.0.0", PackageType::Library)
                .unwrap(),
        }
    }

    fn engine() -> Arc<ScriptedEngine> {
        Arc::new(ScriptedEngine::with_images(["liftoff"]).script(|spec| {
            if let Some(out) = host_path(spec, "/tmp/build") {
                let dist = spec.command.get(3).cloned().unwrap_or_default();
                std::fs::write(
                    out.join(format!("com.github.someone.lib_1.0.0_{}_amd64.deb", dist)),
                    b"deb",
                )
                .unwrap();
            }
            ScriptedRun::exit(0).delay(Duration::from_millis(20))
        }))
    }

    #[tokio::test]
    async fn test_builds_every_target_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(
            DirectorySource::new(source(dir.path())).with_branches([
                "refs/heads/master",
                "refs/heads/deb-packaging-loki",
                "refs/heads/deb-packaging",
            ]),
        );
        let engine = engine();
        let runs = service(dir.path(), engine.clone(), 1)
            .build(request(), repository, None)
            .await
            .unwrap();

        let distributions: Vec<&str> = runs
            .iter()
            .map(|run| run.report.target.distribution.as_str())
            .collect();
        assert_eq!(distributions, vec!["loki", "juno"]);
        assert!(runs.iter().all(|run| run.report.passes()));
        assert!(runs.iter().all(|run| run.direction.is_none()));
        assert_ne!(runs[0].report.id, runs[1].report.id);
        assert_eq!(engine.runs().len(), 2);
        assert!(!dir.path().join("work").join(runs[0].report.id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_explicit_distribution_skips_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(
            DirectorySource::new(source(dir.path())).with_branches(["refs/heads/deb-packaging-loki"]),
        );
        let runs = service(dir.path(), engine(), 2)
            .build(request(), repository, Some("odin"))
            .await
            .unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].report.target.distribution, "odin");
        assert_eq!(runs[0].report.packages().count(), 1);
    }

    #[tokio::test]
    async fn test_zero_parallelism_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(DirectorySource::new(source(dir.path())));
        let runs = service(dir.path(), engine(), 0)
            .build(request(), repository, None)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
    }
}
