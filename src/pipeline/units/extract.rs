//! `extract-deb`: unpack the built package for inspection.

use std::path::PathBuf;

use async_trait::async_trait;
use packforge_runtime::SandboxSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{BUILD_MOUNT, BuildDeb, DebianControl, EXTRACT_MOUNT, container_path, log_tail};
use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOutput {
    /// Host directory holding the unpacked tree, `DEBIAN/` included.
    pub root: PathBuf,
    /// The package that was unpacked.
    pub package: PathBuf,
}

impl ExtractOutput {
    pub fn is_empty(&self) -> bool {
        self.root.as_os_str().is_empty()
    }
}

#[derive(Default)]
pub struct ExtractDeb;

#[async_trait]
impl Unit for ExtractDeb {
    const NAME: &'static str = "extract-deb";
    type Output = ExtractOutput;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let build = cx.require::<BuildDeb>().await?;
        let control = cx.require::<DebianControl>().await?;
        let Some(package) = build.package_for(control.primary_binary()).cloned() else {
            return Err(Interrupt::Unit);
        };

        let workspace = cx.workspace().clone();
        let file_name = package
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let spec = SandboxSpec::new(
            cx.settings().images.tools.as_str(),
            [
                "dpkg-deb".to_string(),
                "-R".to_string(),
                container_path(&workspace.build(), &package, BUILD_MOUNT),
                EXTRACT_MOUNT.to_string(),
            ],
        )
        .mount(workspace.build(), BUILD_MOUNT)
        .mount(workspace.extract(), EXTRACT_MOUNT)
        .privileged()
        .log_name(Self::NAME);

        let outcome = cx.sandbox().run(&spec, workspace.root()).await?;
        if !outcome.success() {
            let tail = log_tail(cx, &outcome).await;
            return Err(cx.critical(
                Finding::error(
                    Template::ExtractFailed,
                    json!({
                        "package": file_name,
                        "exit_code": outcome.exit_code,
                        "log": outcome.log_path.display().to_string(),
                    }),
                )
                .with_dump(tail),
            ));
        }

        Ok(ExtractOutput {
            root: workspace.extract(),
            package,
        })
    }
}
