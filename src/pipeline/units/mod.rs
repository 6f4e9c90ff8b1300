//! The units a package review is made of.
//!
//! | Unit               | Needs                          |
//! |--------------------|--------------------------------|
//! | `project-config`   |                                |
//! | `debian-changelog` |                                |
//! | `debian-control`   |                                |
//! | `build-deb`        | changelog, control             |
//! | `extract-deb`      | build-deb, control             |
//! | `appstream`        | extract-deb, project-config    |
//! | `desktop`          | extract-deb                    |
//! | `pack-deb`         | extract-deb, appstream         |
//!
//! Container paths are fixed; host paths come from the run's workspace.

mod appstream;
mod build;
mod changelog;
mod config;
mod control;
mod desktop;
mod extract;
mod pack;

pub use appstream::{AppStream, AppStreamOutput};
pub use build::{BuildDeb, BuildOutput};
pub use changelog::{ChangelogEntry, DebianChangelog};
pub use config::{CONFIG_FILE, ConfigIssues, Endpoints, LogConfig, ProjectConfig, ProjectConfigUnit};
pub use control::{BinaryPackage, ControlInfo, DebianControl};
pub use desktop::{Desktop, DesktopOutput};
pub use extract::{ExtractDeb, ExtractOutput};
pub use pack::{PackDeb, PackOutput};

use std::path::Path;

use packforge_runtime::SandboxOutcome;

use super::Pipeline;

pub(crate) const REPOSITORY_MOUNT: &str = "/tmp/repository";
pub(crate) const BUILD_MOUNT: &str = "/tmp/build";
pub(crate) const EXTRACT_MOUNT: &str = "/tmp/extract";
pub(crate) const PACKAGE_MOUNT: &str = "/tmp/package";

const LOG_TAIL_LINES: usize = 40;

/// Tail of a sandbox log, attached to findings as their dump.
pub(crate) async fn log_tail(cx: &Pipeline, outcome: &SandboxOutcome) -> String {
    outcome.log_tail(cx.workspace().root(), LOG_TAIL_LINES).await
}

/// Container path of a file under `host_root`, mounted at `mount`.
pub(crate) fn container_path(host_root: &Path, file: &Path, mount: &str) -> String {
    let relative = file.strip_prefix(host_root).unwrap_or(file);
    format!(
        "{}/{}",
        mount.trim_end_matches('/'),
        relative.to_string_lossy().trim_start_matches('/')
    )
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Pipelines over a local source tree and a scripted container engine.

    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use packforge_common::{BuildTarget, PackageIdentity, PackageType};
    use packforge_runtime::testing::{ScriptedEngine, ScriptedRun, host_path};
    use packforge_runtime::{ContainerSpec, Sandbox, SandboxConfig};

    use crate::pipeline::{BuildRequest, Pipeline, PipelineDeps, RepositoryHandle};
    use crate::repository::DirectorySource;
    use crate::settings::Settings;

    pub const NAME: &str = "com.github.someone.app";

    /// Engine with both images present that answers with `script`.
    pub fn engine<F>(script: F) -> Arc<ScriptedEngine>
    where
        F: Fn(&ContainerSpec) -> ScriptedRun + Send + Sync + 'static,
    {
        Arc::new(ScriptedEngine::with_images(["liftoff", "packforge-tools"]).script(script))
    }

    /// Host directory bound at `container` in `spec`.
    pub fn bound(spec: &ContainerSpec, container: &str) -> PathBuf {
        host_path(spec, container).unwrap_or_default()
    }

    /// Write `files` into a fresh source tree and set up a pipeline over it.
    pub async fn pipeline(
        root: &Path,
        package_type: PackageType,
        files: &[(&str, &str)],
        engine: Arc<ScriptedEngine>,
    ) -> Pipeline {
        let source = root.join("source");
        std::fs::create_dir_all(&source).unwrap();
        for (path, content) in files {
            let path = source.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        let mut settings = Settings::default();
        settings.service.workspace_root = root.join("work");
        settings.service.artifact_dir = root.join("artifacts");
        let deps = PipelineDeps {
            settings: Arc::new(settings),
            sandbox: Arc::new(Sandbox::new(engine, SandboxConfig::default())),
            repository: Arc::new(DirectorySource::new(&source)),
        };
        let request = BuildRequest {
            repository: RepositoryHandle {
                url: "https://github.com/someone/app.git".into(),
                reference: "1.0.0".into(),
            },
            package: PackageIdentity::new(NAME, "1.0.0", package_type).unwrap(),
        };
        let mut cx = Pipeline::new(request, BuildTarget::amd64("juno"), deps);
        cx.setup().await.unwrap();
        cx
    }

    pub const CHANGELOG: &str = "com.github.someone.app (1.0.0) juno; urgency=medium\n\n  * Initial release.\n\n -- Someone <someone@example.com>  Mon, 05 Oct 2026 12:00:00 +0000\n";

    pub const CONTROL: &str = "Source: com.github.someone.app\nSection: x11\nMaintainer: Someone <someone@example.com>\nBuild-Depends: debhelper (>= 10),\n meson\n\nPackage: com.github.someone.app\nArchitecture: any\nDescription: An app\n A longer description.\n";

    /// Source files of a well-formed app.
    pub fn packaging() -> Vec<(&'static str, &'static str)> {
        vec![("debian/changelog", CHANGELOG), ("debian/control", CONTROL)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_container_path() {
        let root = PathBuf::from("/ws/extract");
        assert_eq!(
            container_path(
                &root,
                &root.join("usr/share/metainfo/a.appdata.xml"),
                EXTRACT_MOUNT
            ),
            "/tmp/extract/usr/share/metainfo/a.appdata.xml"
        );
        assert_eq!(
            container_path(&root, Path::new("app.deb"), BUILD_MOUNT),
            "/tmp/build/app.deb"
        );
    }
}
