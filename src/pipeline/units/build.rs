//! `build-deb`: build the package inside the build image.

use std::path::PathBuf;

use async_trait::async_trait;
use packforge_runtime::SandboxSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{BUILD_MOUNT, DebianChangelog, DebianControl, REPOSITORY_MOUNT, log_tail};
use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// `.deb` files in the build directory.
    pub packages: Vec<PathBuf>,
    /// Every file the build wrote.
    pub files: Vec<PathBuf>,
    /// Build log, relative to the workspace.
    pub log: PathBuf,
}

impl BuildOutput {
    /// Package built for `binary`, or the first package when none matches.
    pub fn package_for(&self, binary: Option<&str>) -> Option<&PathBuf> {
        binary
            .and_then(|name| {
                let prefix = format!("{}_", name);
                self.packages.iter().find(|path| {
                    path.file_name()
                        .is_some_and(|f| f.to_string_lossy().starts_with(&prefix))
                })
            })
            .or_else(|| self.packages.first())
    }
}

#[derive(Default)]
pub struct BuildDeb;

#[async_trait]
impl Unit for BuildDeb {
    const NAME: &'static str = "build-deb";
    type Output = BuildOutput;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        cx.require::<DebianChangelog>().await?;
        cx.require::<DebianControl>().await?;

        let target = cx.target().clone();
        let workspace = cx.workspace().clone();
        let spec = SandboxSpec::new(
            cx.settings().images.build.as_str(),
            [
                "-a",
                target.architecture.as_str(),
                "-d",
                target.distribution.as_str(),
                "-o",
                BUILD_MOUNT,
            ],
        )
        .mount(workspace.repository(), REPOSITORY_MOUNT)
        .mount(workspace.build(), BUILD_MOUNT)
        .privileged()
        .log_name(Self::NAME);

        let outcome = cx.sandbox().run(&spec, workspace.root()).await?;
        if !outcome.success() {
            let tail = log_tail(cx, &outcome).await;
            return Err(cx.critical(
                Finding::error(
                    Template::BuildFailed,
                    json!({
                        "distribution": target.distribution,
                        "architecture": target.architecture,
                        "exit_code": outcome.exit_code,
                        "log": outcome.log_path.display().to_string(),
                        "timed_out": outcome.timed_out,
                    }),
                )
                .with_dump(tail),
            ));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(workspace.build()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let packages: Vec<PathBuf> = files
            .iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "deb"))
            .cloned()
            .collect();
        if packages.is_empty() {
            return Err(cx.critical(Finding::error(
                Template::BuildNoPackage,
                json!({
                    "distribution": target.distribution,
                    "architecture": target.architecture,
                }),
            )));
        }

        for file in &files {
            cx.produce(file);
        }
        tracing::info!(packages = packages.len(), "build produced packages");

        Ok(BuildOutput {
            packages,
            files,
            log: outcome.log_path,
        })
    }
}
