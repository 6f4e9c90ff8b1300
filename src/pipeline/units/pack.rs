//! `pack-deb`: rebuild the package from the (possibly rewritten) tree.

use std::path::PathBuf;

use async_trait::async_trait;
use packforge_runtime::SandboxSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AppStream, EXTRACT_MOUNT, ExtractDeb, PACKAGE_MOUNT, log_tail};
use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackOutput {
    pub package: Option<PathBuf>,
}

#[derive(Default)]
pub struct PackDeb;

#[async_trait]
impl Unit for PackDeb {
    const NAME: &'static str = "pack-deb";
    type Output = PackOutput;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let extract = cx.require::<ExtractDeb>().await?;
        // Metadata edits must land before the tree is packed.
        cx.require::<AppStream>().await?;
        if extract.is_empty() {
            return Err(Interrupt::Unit);
        }

        let Some(file_name) = extract
            .package
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
        else {
            return Err(Interrupt::Unit);
        };

        let workspace = cx.workspace().clone();
        let spec = SandboxSpec::new(
            cx.settings().images.tools.as_str(),
            [
                "dpkg-deb".to_string(),
                "-b".to_string(),
                EXTRACT_MOUNT.to_string(),
                format!("{}/{}", PACKAGE_MOUNT, file_name),
            ],
        )
        .mount(&extract.root, EXTRACT_MOUNT)
        .mount(workspace.package(), PACKAGE_MOUNT)
        .privileged()
        .log_name(Self::NAME);

        let outcome = cx.sandbox().run(&spec, workspace.root()).await?;
        let repacked = workspace.package().join(&file_name);
        if !outcome.success() || !repacked.is_file() {
            let tail = log_tail(cx, &outcome).await;
            return Err(cx.critical(
                Finding::error(
                    Template::PackFailed,
                    json!({
                        "package": file_name,
                        "exit_code": outcome.exit_code,
                        "log": outcome.log_path.display().to_string(),
                    }),
                )
                .with_dump(tail),
            ));
        }

        cx.produce(&repacked);
        Ok(PackOutput {
            package: Some(repacked),
        })
    }
}
