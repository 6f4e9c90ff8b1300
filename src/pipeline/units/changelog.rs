//! `debian-changelog`: the top entry of `debian/changelog`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

const CHANGELOG: &str = "debian/changelog";

// Compile once: `name (version) distributions; urgency=level`
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<package>[A-Za-z0-9][A-Za-z0-9.+\-]*)\s+\((?P<version>[^)\s]+)\)\s+(?P<distributions>[^;]+?)\s*;\s*urgency=(?P<urgency>\S+)",
    )
    .unwrap()
});

/// The latest changelog entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub package: String,
    pub version: String,
    pub distributions: Vec<String>,
    pub urgency: String,
}

impl ChangelogEntry {
    /// Parse the first entry header. `Err` carries the offending line.
    pub fn parse(content: &str) -> Result<Self, String> {
        let line = content
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        let caps = HEADER.captures(line).ok_or_else(|| line.to_string())?;
        Ok(Self {
            package: caps["package"].to_string(),
            version: caps["version"].to_string(),
            distributions: caps["distributions"]
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            urgency: caps["urgency"].to_string(),
        })
    }

    /// Version without epoch and Debian revision: `1:1.2.0-1` is `1.2.0`.
    pub fn upstream_version(&self) -> &str {
        let version = self
            .version
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.version);
        version
            .rsplit_once('-')
            .map(|(upstream, _)| upstream)
            .unwrap_or(version)
    }
}

#[derive(Default)]
pub struct DebianChangelog;

#[async_trait]
impl Unit for DebianChangelog {
    const NAME: &'static str = "debian-changelog";
    type Output = ChangelogEntry;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let path = cx.workspace().repository().join(CHANGELOG);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(cx.critical(Finding::error(
                    Template::ChangelogMissing,
                    json!({"path": CHANGELOG}),
                )));
            }
            Err(e) => {
                return Err(cx.critical(
                    Finding::error(Template::ChangelogParse, json!({"line": ""})).with_error(&e),
                ));
            }
        };

        let entry = match ChangelogEntry::parse(&content) {
            Ok(entry) => entry,
            Err(line) => {
                return Err(cx.critical(Finding::error(
                    Template::ChangelogParse,
                    json!({"line": line}),
                )));
            }
        };

        let expected_name = cx.package().debian_name();
        if entry.package != expected_name {
            cx.report(Finding::error(
                Template::ChangelogPackageMismatch,
                json!({"found": entry.package, "expected": expected_name}),
            ));
        }

        let expected_version = cx.package().version.clone();
        if entry.upstream_version() != expected_version {
            cx.report(Finding::error(
                Template::ChangelogVersionMismatch,
                json!({"found": entry.version, "expected": expected_version}),
            ));
        }

        let distribution = cx.target().distribution.clone();
        if !entry.distributions.contains(&distribution) {
            cx.report(Finding::info(
                Template::ChangelogDistribution,
                json!({"found": entry.distributions.join(" "), "expected": distribution}),
            ));
        }

        Ok(entry)
    }
}
