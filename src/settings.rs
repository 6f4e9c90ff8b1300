//! Service configuration for packforge.
//!
//! Settings are read from `packforge.toml` and layered:
//! defaults → file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! workspace_root = "/var/tmp/packforge"
//! artifact_dir = "artifacts"
//! max_parallel = 2
//! container_timeout_secs = 3600
//!
//! [matrix]
//! branch_prefix = "deb-packaging"
//! default_distribution = "juno"
//! architecture = "amd64"
//!
//! [images]
//! build = "liftoff"
//! tools = "packforge-tools"
//! recipes = "dockerfiles"
//!
//! [github]
//! api_url = "https://api.github.com"
//! upload_url = "https://uploads.github.com"
//!
//! [package_repository]
//! url = "https://repo.example.org/api"
//! ```
//!
//! Tokens are never read from the file's defaults; they come from
//! `GITHUB_TOKEN` and `PACKFORGE_REPOSITORY_TOKEN` (a `.env` file is honored).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use packforge_runtime::SandboxConfig;
use serde::{Deserialize, Serialize};

use crate::matrix::MatrixSettings;

/// File name looked up in the working directory and the user config dir.
pub const SETTINGS_FILE: &str = "packforge.toml";

/// Where runs happen and how many run at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Parent directory of every run workspace.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Where produced packages are copied before a workspace is removed.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Maximum pipelines running at the same time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Upper bound for a single container run.
    #[serde(default = "default_container_timeout_secs")]
    pub container_timeout_secs: u64,
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("packforge")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_max_parallel() -> usize {
    2
}

fn default_container_timeout_secs() -> u64 {
    3600
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            artifact_dir: default_artifact_dir(),
            max_parallel: default_max_parallel(),
            container_timeout_secs: default_container_timeout_secs(),
        }
    }
}

/// Container images used by the units, referenced by name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesSection {
    /// Image that builds a Debian package from a source tree.
    #[serde(default = "default_build_image")]
    pub build: String,
    /// Image with dpkg-deb, appstreamcli and desktop-file-validate.
    #[serde(default = "default_tools_image")]
    pub tools: String,
    /// Directory holding one recipe directory per image name.
    #[serde(default = "default_recipes")]
    pub recipes: PathBuf,
}

fn default_build_image() -> String {
    "liftoff".to_string()
}

fn default_tools_image() -> String {
    "packforge-tools".to_string()
}

fn default_recipes() -> PathBuf {
    PathBuf::from("dockerfiles")
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            build: default_build_image(),
            tools: default_tools_image(),
            recipes: default_recipes(),
        }
    }
}

/// GitHub endpoints for labels, issues and release assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_github_upload_url")]
    pub upload_url: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_upload_url() -> String {
    "https://uploads.github.com".to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            upload_url: default_github_upload_url(),
            token: None,
        }
    }
}

/// Package repository that receives published `.deb` files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageRepositorySection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

/// The complete packforge.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub matrix: MatrixSettings,
    #[serde(default)]
    pub images: ImagesSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub package_repository: PackageRepositorySection,
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse packforge.toml")
    }

    /// Load settings from a TOML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load settings with file discovery and environment overrides.
    ///
    /// An explicit `path` must exist. Without one, `./packforge.toml` and then
    /// the user config directory are tried; if neither exists the defaults
    /// apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut settings = match path {
            Some(path) => Self::load_file(path)?,
            None => match Self::discover() {
                Some(found) => Self::load_file(&found)?,
                None => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(SETTINGS_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("packforge").join(SETTINGS_FILE))
            .filter(|path| path.is_file())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("PACKFORGE_WORKSPACE_ROOT") {
            self.service.workspace_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("PACKFORGE_ARTIFACT_DIR") {
            self.service.artifact_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("PACKFORGE_MAX_PARALLEL") {
            self.service.max_parallel = max
                .parse()
                .with_context(|| format!("PACKFORGE_MAX_PARALLEL is not a number: {}", max))?;
        }
        if let Some(distribution) = lookup("PACKFORGE_DEFAULT_DISTRIBUTION") {
            self.matrix.default_distribution = distribution;
        }
        if let Some(token) = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            self.github.token = Some(token);
        }
        if let Some(url) = lookup("PACKFORGE_REPOSITORY_URL") {
            self.package_repository.url = Some(url);
        }
        if let Some(token) = lookup("PACKFORGE_REPOSITORY_TOKEN").filter(|t| !t.is_empty()) {
            self.package_repository.token = Some(token);
        }
        Ok(())
    }

    /// Save settings to a TOML file. Tokens are never written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize packforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Sandbox runner configuration derived from these settings.
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            recipes: self.images.recipes.clone(),
            timeout: Duration::from_secs(self.service.container_timeout_secs),
            ..Default::default()
        }
    }

    /// Reject values that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        if self.service.max_parallel == 0 {
            anyhow::bail!("service.max_parallel must be at least 1");
        }
        if self.matrix.branch_prefix.trim().is_empty() {
            anyhow::bail!("matrix.branch_prefix must not be empty");
        }
        if self.matrix.default_distribution.trim().is_empty() {
            anyhow::bail!("matrix.default_distribution must not be empty");
        }
        if self.images.build.trim().is_empty() || self.images.tools.trim().is_empty() {
            anyhow::bail!("images.build and images.tools must name an image");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.service.max_parallel, 2);
        assert_eq!(settings.matrix.branch_prefix, "deb-packaging");
        assert_eq!(settings.matrix.default_distribution, "juno");
        assert_eq!(settings.images.build, "liftoff");
        assert_eq!(settings.github.api_url, "https://api.github.com");
        assert!(settings.github.token.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let settings = Settings::parse(
            r#"
[matrix]
default_distribution = "odin"

[images]
build = "builder"
"#,
        )
        .unwrap();
        assert_eq!(settings.matrix.default_distribution, "odin");
        assert_eq!(settings.matrix.branch_prefix, "deb-packaging");
        assert_eq!(settings.images.build, "builder");
        assert_eq!(settings.images.tools, "packforge-tools");
        assert_eq!(settings.service.max_parallel, 2);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(Settings::parse("not valid toml {{{{").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut settings = Settings::parse("[service]\nmax_parallel = 8\n").unwrap();
        let env = HashMap::from([
            ("PACKFORGE_MAX_PARALLEL", "3"),
            ("PACKFORGE_DEFAULT_DISTRIBUTION", "loki"),
            ("GITHUB_TOKEN", "ghp_example"),
            ("PACKFORGE_REPOSITORY_TOKEN", ""),
        ]);
        settings
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.service.max_parallel, 3);
        assert_eq!(settings.matrix.default_distribution, "loki");
        assert_eq!(settings.github.token.as_deref(), Some("ghp_example"));
        assert!(settings.package_repository.token.is_none());
    }

    #[test]
    fn test_env_rejects_non_numeric_parallelism() {
        let mut settings = Settings::default();
        let result = settings.apply_env(|key| {
            (key == "PACKFORGE_MAX_PARALLEL").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_save_never_writes_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let mut settings = Settings::default();
        settings.github.token = Some("ghp_secret".into());
        settings.package_repository.token = Some("repo-secret".into());
        settings.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("secret"));
        let reloaded = Settings::load_file(&path).unwrap();
        assert_eq!(reloaded.matrix.default_distribution, "juno");
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut settings = Settings::default();
        settings.service.max_parallel = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_sandbox_config_uses_recipes_and_timeout() {
        let mut settings = Settings::default();
        settings.service.container_timeout_secs = 60;
        settings.images.recipes = PathBuf::from("/srv/recipes");
        let config = settings.sandbox_config();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.recipes, PathBuf::from("/srv/recipes"));
    }
}
