//! `desktop`: validate the installed desktop entry and its icon.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use packforge_common::PackageType;
use packforge_runtime::SandboxSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{EXTRACT_MOUNT, ExtractDeb, container_path, log_tail};
use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

const ICON_SIZES: [&str; 3] = ["64x64", "128x128", "scalable"];
const ICON_EXTENSIONS: [&str; 3] = ["png", "svg", "svgz"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopOutput {
    /// Desktop entry, relative to the extracted tree.
    pub path: Option<PathBuf>,
    pub icon: Option<String>,
    pub icon_found: bool,
}

/// Value of `key` in the `[Desktop Entry]` group.
pub fn entry_value(content: &str, key: &str) -> Option<String> {
    let mut in_entry = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((k, v)) if k.trim() == key => return Some(v.trim().to_string()),
            _ => {}
        }
    }
    None
}

/// Whether `icon` is installed under the extracted tree.
pub fn icon_installed(root: &Path, icon: &str) -> bool {
    if icon.starts_with('/') {
        return root.join(icon.trim_start_matches('/')).is_file();
    }
    let hicolor = root.join("usr/share/icons/hicolor");
    ICON_SIZES.iter().any(|size| {
        ICON_EXTENSIONS.iter().any(|ext| {
            hicolor
                .join(size)
                .join("apps")
                .join(format!("{}.{}", icon, ext))
                .is_file()
        })
    })
}

#[derive(Default)]
pub struct Desktop;

#[async_trait]
impl Unit for Desktop {
    const NAME: &'static str = "desktop";
    type Output = DesktopOutput;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let extract = cx.require::<ExtractDeb>().await?;
        if extract.is_empty() {
            return Err(Interrupt::Unit);
        }

        let name = cx.package().name.clone();
        let relative = PathBuf::from(format!("usr/share/applications/{}.desktop", name));
        let file = extract.root.join(&relative);
        if !file.is_file() {
            let data = json!({"path": relative.display().to_string()});
            let finding = if cx.package().package_type == PackageType::SystemApp {
                Finding::info(Template::DesktopMissing, data)
            } else {
                Finding::error(Template::DesktopMissing, data)
            };
            cx.report(finding);
            return Err(Interrupt::Unit);
        }

        let workspace = cx.workspace().clone();
        let spec = SandboxSpec::new(
            cx.settings().images.tools.as_str(),
            [
                "desktop-file-validate".to_string(),
                container_path(&extract.root, &file, EXTRACT_MOUNT),
            ],
        )
        .mount(&extract.root, EXTRACT_MOUNT)
        .log_name(Self::NAME);
        let outcome = cx.sandbox().run(&spec, workspace.root()).await?;
        if !outcome.success() {
            let tail = log_tail(cx, &outcome).await;
            cx.report(
                Finding::error(
                    Template::DesktopInvalid,
                    json!({
                        "exit_code": outcome.exit_code,
                        "log": outcome.log_path.display().to_string(),
                    }),
                )
                .with_dump(tail),
            );
        }

        let content = tokio::fs::read_to_string(&file).await?;
        let icon = entry_value(&content, "Icon");
        let icon_found = match icon.as_deref() {
            Some(icon) => {
                let found = icon_installed(&extract.root, icon);
                if !found {
                    cx.report(Finding::warn(
                        Template::DesktopIconMissing,
                        json!({"icon": icon}),
                    ));
                }
                found
            }
            None => false,
        };

        Ok(DesktopOutput {
            path: Some(relative),
            icon,
            icon_found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::units::{BUILD_MOUNT, testkit};
    use packforge_common::Level;
    use packforge_runtime::testing::{ScriptedEngine, ScriptedRun};
    use std::sync::Arc;

    const ENTRY: &str = "[Desktop Entry]\nName=App\nExec=com.github.someone.app\nIcon=com.github.someone.app\nType=Application\n\n[Desktop Action New]\nIcon=other\n";

    fn engine(entry: Option<&'static str>, icon: bool) -> Arc<ScriptedEngine> {
        testkit::engine(move |spec| match spec.command.first().map(String::as_str) {
            Some("dpkg-deb") => {
                let root = testkit::bound(spec, EXTRACT_MOUNT);
                if let Some(entry) = entry {
                    let dir = root.join("usr/share/applications");
                    std::fs::create_dir_all(&dir).unwrap();
                    std::fs::write(dir.join("com.github.someone.app.desktop"), entry).unwrap();
                }
                if icon {
                    let dir = root.join("usr/share/icons/hicolor/64x64/apps");
                    std::fs::create_dir_all(&dir).unwrap();
                    std::fs::write(dir.join("com.github.someone.app.png"), b"png").unwrap();
                }
                ScriptedRun::exit(0)
            }
            Some("desktop-file-validate") => ScriptedRun::exit(0),
            _ => {
                let out = testkit::bound(spec, BUILD_MOUNT);
                std::fs::write(out.join("com.github.someone.app_1.0.0_amd64.deb"), b"p").unwrap();
                ScriptedRun::exit(0)
            }
        })
    }

    #[test]
    fn test_entry_value_reads_main_group_only() {
        assert_eq!(
            entry_value(ENTRY, "Icon").as_deref(),
            Some("com.github.someone.app")
        );
        assert_eq!(entry_value(ENTRY, "Missing"), None);
        assert_eq!(entry_value("[Other]\nIcon=x\n", "Icon"), None);
    }

    #[tokio::test]
    async fn test_entry_with_icon_passes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cx = testkit::pipeline(
            dir.path(),
            PackageType::App,
            &testkit::packaging(),
            engine(Some(ENTRY), true),
        )
        .await;

        let output = cx.require::<Desktop>().await.unwrap();
        assert!(output.icon_found);
        assert!(cx.findings().is_empty());
    }

    #[tokio::test]
    async fn test_missing_icon_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut cx = testkit::pipeline(
            dir.path(),
            PackageType::App,
            &testkit::packaging(),
            engine(Some(ENTRY), false),
        )
        .await;

        let output = cx.require::<Desktop>().await.unwrap();
        assert!(!output.icon_found);
        let finding = &cx.findings().entries()[0];
        assert_eq!(finding.template(), Template::DesktopIconMissing);
        assert_eq!(finding.level(), Level::Warn);
        assert!(cx.passes());
    }

    #[tokio::test]
    async fn test_missing_entry_is_an_error_for_apps() {
        let dir = tempfile::tempdir().unwrap();
        let mut cx = testkit::pipeline(
            dir.path(),
            PackageType::App,
            &testkit::packaging(),
            engine(None, false),
        )
        .await;

        cx.require::<Desktop>().await.unwrap();
        assert_eq!(cx.findings().entries()[0].level(), Level::Error);
        assert_eq!(
            cx.state_of("desktop"),
            Some(crate::pipeline::UnitState::Errored { critical: false })
        );
    }

    #[tokio::test]
    async fn test_missing_entry_is_info_for_system_apps() {
        let dir = tempfile::tempdir().unwrap();
        let mut cx = testkit::pipeline(
            dir.path(),
            PackageType::SystemApp,
            &testkit::packaging(),
            engine(None, false),
        )
        .await;

        cx.require::<Desktop>().await.unwrap();
        assert_eq!(cx.findings().entries()[0].level(), Level::Info);
        assert!(cx.passes());
    }

    #[test]
    fn test_absolute_icon_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("usr/share/app")).unwrap();
        std::fs::write(dir.path().join("usr/share/app/icon.svg"), "svg").unwrap();
        assert!(icon_installed(dir.path(), "/usr/share/app/icon.svg"));
        assert!(!icon_installed(dir.path(), "/usr/share/app/none.svg"));
    }
}
