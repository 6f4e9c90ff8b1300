//! Publish director: act on a finished run.
//!
//! Two independent paths run after every pipeline:
//!
//! - **publish**: a passing run's packages go to the package repository
//!   and/or become release assets on the source host.
//! - **report**: findings at or above the configured level are filed as one
//!   labelled issue on the source host.
//!
//! A failure on one path never suppresses the other, and neither changes the
//! build verdict. Failures are logged and listed in [`DirectorOutcome`].

pub mod github;
pub mod repository;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use packforge_common::Level;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::errors::PublishError;
use crate::findings::Finding;
use crate::pipeline::units::ProjectConfig;
use crate::pipeline::{Artifact, RunReport};
use crate::settings::Settings;
use crate::templates::{self, Template};

pub use github::{GitHubClient, parse_owner_repo_from_url};
pub use repository::RepositoryClient;

/// Registered media type of Debian binary packages.
pub(crate) const DEB_CONTENT_TYPE: &str = "application/vnd.debian.binary-package";

/// Content type an artifact is uploaded with.
pub(crate) fn content_type(path: &Path) -> String {
    if path.extension().is_some_and(|ext| ext == "deb") {
        return DEB_CONTENT_TYPE.to_string();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// A filed issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    pub url: String,
}

/// Issue tracker and release host of the source repository.
///
/// `slug` is the `owner/repo` form of the repository.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Create the label; an existing label is not an error.
    async fn ensure_label(&self, slug: &str, name: &str, color: &str) -> Result<(), PublishError>;

    async fn create_issue(&self, slug: &str, title: &str, body: &str)
    -> Result<IssueRef, PublishError>;

    async fn label_issue(&self, slug: &str, number: u64, label: &str) -> Result<(), PublishError>;

    /// Attach `artifact` to the release tagged `tag`. Returns the download URL.
    async fn upload_release_asset(
        &self,
        slug: &str,
        tag: &str,
        artifact: &Artifact,
    ) -> Result<String, PublishError>;
}

/// Repository that serves built packages to users.
#[async_trait]
pub trait PackageRepository: Send + Sync {
    async fn upload(&self, directory: &str, artifact: &Artifact) -> Result<(), PublishError>;

    async fn publish(&self, directory: &str, distribution: &str) -> Result<(), PublishError>;
}

/// Collaborators of the director.
#[derive(Clone)]
pub struct DirectorDeps {
    pub source_host: Arc<dyn SourceHost>,
    pub package_repository: Option<Arc<dyn PackageRepository>>,
}

/// What the director did for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorOutcome {
    /// Packages were published to the package repository.
    pub published: bool,
    /// Download URLs of uploaded release assets.
    pub released: Vec<String>,
    pub issue: Option<IssueRef>,
    pub errors: Vec<String>,
}

pub struct Director {
    deps: DirectorDeps,
}

impl Director {
    pub fn new(deps: DirectorDeps) -> Self {
        Self { deps }
    }

    /// Director backed by the HTTP clients described in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let source_host = Arc::new(GitHubClient::new(
            settings.github.api_url.clone(),
            settings.github.upload_url.clone(),
            settings.github.token.clone(),
        ));
        let package_repository = settings.package_repository.url.as_ref().map(|url| {
            Arc::new(RepositoryClient::new(
                url.clone(),
                settings.package_repository.token.clone(),
            )) as Arc<dyn PackageRepository>
        });
        Self::new(DirectorDeps {
            source_host,
            package_repository,
        })
    }

    /// Publish and report for `report` as `config` asks.
    pub async fn direct(&self, report: &RunReport, config: &ProjectConfig) -> DirectorOutcome {
        let mut outcome = DirectorOutcome::default();

        if report.passes() {
            if config.endpoints.elementary {
                match self.publish(report).await {
                    Ok(published) => outcome.published = published,
                    Err(err) => record(&mut outcome, "publish", err),
                }
            }
            if config.endpoints.github {
                match self.release(report, &mut outcome).await {
                    Ok(()) => {}
                    Err(err) => record(&mut outcome, "release", err),
                }
            }
        }

        if config.log.enabled {
            match self.file_issue(report, config).await {
                Ok(issue) => outcome.issue = issue,
                Err(err) => record(&mut outcome, "report", err),
            }
        }

        outcome
    }

    async fn publish(&self, report: &RunReport) -> Result<bool, PublishError> {
        let repository = self
            .deps
            .package_repository
            .as_ref()
            .ok_or(PublishError::NotConfigured("package repository"))?;
        let packages: Vec<&Artifact> = report.packages().collect();
        if packages.is_empty() {
            warn!(run_id = %report.id, "no packages to publish");
            return Ok(false);
        }

        let directory = report.id.to_string();
        for package in &packages {
            repository.upload(&directory, package).await?;
        }
        repository
            .publish(&directory, &report.target.distribution)
            .await?;
        info!(
            run_id = %report.id,
            packages = packages.len(),
            distribution = %report.target.distribution,
            "published packages"
        );
        Ok(true)
    }

    async fn release(
        &self,
        report: &RunReport,
        outcome: &mut DirectorOutcome,
    ) -> Result<(), PublishError> {
        let slug = slug(report)?;
        let tag = &report.request.repository.reference;
        for artifact in &report.artifacts {
            let url = self
                .deps
                .source_host
                .upload_release_asset(&slug, tag, artifact)
                .await?;
            info!(asset = %artifact.name, tag = %tag, "uploaded release asset");
            outcome.released.push(url);
        }
        Ok(())
    }

    async fn file_issue(
        &self,
        report: &RunReport,
        config: &ProjectConfig,
    ) -> Result<Option<IssueRef>, PublishError> {
        let Some(data) = issue_data(report, config.log.level) else {
            return Ok(None);
        };
        let slug = slug(report)?;
        let host = &self.deps.source_host;
        let label = config.log.label.as_str();

        // The issue is still filed when the label cannot be created.
        let labelled = match host.ensure_label(&slug, label, &config.log.color).await {
            Ok(()) => true,
            Err(err) => {
                warn!(label, error = %err, "failed to ensure issue label");
                false
            }
        };

        let rendered = templates::render(Template::ReportIssue, &data);
        let issue = host
            .create_issue(&slug, &rendered.title, &rendered.body)
            .await?;
        info!(issue = issue.number, url = %issue.url, "filed review issue");

        if labelled {
            host.label_issue(&slug, issue.number, label).await?;
        }
        Ok(Some(issue))
    }
}

fn record(outcome: &mut DirectorOutcome, path: &str, err: PublishError) {
    warn!(path, error = %err, "director step failed");
    outcome.errors.push(format!("{}: {}", path, err));
}

fn slug(report: &RunReport) -> Result<String, PublishError> {
    let url = &report.request.repository.url;
    parse_owner_repo_from_url(url).ok_or_else(|| PublishError::NotGitHub(url.clone()))
}

/// Template data for the aggregated issue, or `None` when no finding reaches
/// `level`. Findings are grouped by level, most severe first.
pub fn issue_data(report: &RunReport, level: Level) -> Option<Value> {
    let reported: Vec<&Finding> = report.findings.at_or_above(level).collect();
    if reported.is_empty() {
        return None;
    }

    let groups: Vec<Value> = [Level::Error, Level::Warn, Level::Info, Level::Debug]
        .into_iter()
        .filter_map(|group| {
            let findings: Vec<Value> = reported
                .iter()
                .filter(|f| f.level() == group)
                .map(|f| {
                    json!({
                        "title": f.title(),
                        "body": f.body(),
                        "unit": f.unit(),
                        "dump": f.dump(),
                    })
                })
                .collect();
            if findings.is_empty() {
                None
            } else {
                Some(json!({"level": group, "count": findings.len(), "findings": findings}))
            }
        })
        .collect();

    let package = &report.request.package;
    Some(json!({
        "count": reported.len(),
        "level": level,
        "name": package.name,
        "version": package.version,
        "distribution": report.target.distribution,
        "reference": report.request.repository.reference,
        "groups": groups,
    }))
}
