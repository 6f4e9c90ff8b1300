//! Build matrix resolution from branch names.
//!
//! A repository opts into extra distributions by carrying packaging branches:
//! `deb-packaging-<dist>` builds for `<dist>`, a bare `deb-packaging` builds
//! for the default distribution. Without any packaging branch, the default
//! distribution is built once.

use packforge_common::BuildTarget;
use serde::{Deserialize, Serialize};

/// Naming rules for packaging branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSettings {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_distribution")]
    pub default_distribution: String,
    #[serde(default = "default_architecture")]
    pub architecture: String,
}

fn default_branch_prefix() -> String {
    "deb-packaging".to_string()
}

fn default_distribution() -> String {
    "juno".to_string()
}

fn default_architecture() -> String {
    "amd64".to_string()
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            default_distribution: default_distribution(),
            architecture: default_architecture(),
        }
    }
}

/// Strip `refs/heads/` and `origin/` from a branch reference.
pub fn short_branch(name: &str) -> &str {
    let name = name.trim();
    let name = name.strip_prefix("refs/heads/").unwrap_or(name);
    let name = name.strip_prefix("refs/remotes/").unwrap_or(name);
    name.strip_prefix("origin/").unwrap_or(name)
}

/// Resolve the ordered, duplicate-free list of targets for `branches`.
pub fn resolve_matrix<I, S>(branches: I, settings: &MatrixSettings) -> Vec<BuildTarget>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let prefix = settings.branch_prefix.as_str();
    let dist_prefix = format!("{}-", prefix);
    let mut targets: Vec<BuildTarget> = Vec::new();
    let mut bare = false;

    for branch in branches {
        let name = short_branch(branch.as_ref());
        if name == prefix {
            bare = true;
            continue;
        }
        let Some(dist) = name.strip_prefix(&dist_prefix) else {
            continue;
        };
        if dist.is_empty() {
            continue;
        }
        let target = BuildTarget::new(dist, settings.architecture.as_str());
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    let fallback = BuildTarget::new(
        settings.default_distribution.as_str(),
        settings.architecture.as_str(),
    );
    if (bare || targets.is_empty()) && !targets.contains(&fallback) {
        targets.push(fallback);
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dists(targets: &[BuildTarget]) -> Vec<&str> {
        targets.iter().map(|t| t.distribution.as_str()).collect()
    }

    #[test]
    fn test_no_packaging_branches_builds_default_once() {
        let targets = resolve_matrix(["master", "feature/x"], &MatrixSettings::default());
        assert_eq!(targets, vec![BuildTarget::amd64("juno")]);
    }

    #[test]
    fn test_empty_branch_list_builds_default_once() {
        let targets = resolve_matrix(Vec::<String>::new(), &MatrixSettings::default());
        assert_eq!(targets, vec![BuildTarget::amd64("juno")]);
    }

    #[test]
    fn test_distribution_branches_without_bare_branch() {
        let targets = resolve_matrix(
            ["master", "deb-packaging-loki", "deb-packaging-juno"],
            &MatrixSettings::default(),
        );
        assert_eq!(dists(&targets), vec!["loki", "juno"]);
        assert!(targets.iter().all(|t| t.architecture == "amd64"));
    }

    #[test]
    fn test_bare_branch_adds_default_after_distributions() {
        let targets = resolve_matrix(
            ["deb-packaging", "deb-packaging-loki"],
            &MatrixSettings::default(),
        );
        assert_eq!(dists(&targets), vec!["loki", "juno"]);
    }

    #[test]
    fn test_full_branch_set_builds_each_distribution_once() {
        let targets = resolve_matrix(
            [
                "deb-packaging-loki",
                "deb-packaging-juno",
                "deb-packaging",
                "juno",
                "loki",
                "master",
            ],
            &MatrixSettings::default(),
        );
        assert_eq!(
            targets,
            vec![BuildTarget::amd64("loki"), BuildTarget::amd64("juno")]
        );
    }

    #[test]
    fn test_explicit_branch_augments_default() {
        let targets = resolve_matrix(
            ["deb-packaging-loki", "deb-packaging", "master"],
            &MatrixSettings::default(),
        );
        assert_eq!(
            targets,
            vec![BuildTarget::amd64("loki"), BuildTarget::amd64("juno")]
        );
    }

    #[test]
    fn test_bare_branch_does_not_duplicate_default() {
        let targets = resolve_matrix(
            ["deb-packaging-juno", "deb-packaging"],
            &MatrixSettings::default(),
        );
        assert_eq!(dists(&targets), vec!["juno"]);
    }

    #[test]
    fn test_duplicate_branches_are_suppressed() {
        let targets = resolve_matrix(
            [
                "deb-packaging-loki",
                "origin/deb-packaging-loki",
                "refs/heads/deb-packaging-loki",
            ],
            &MatrixSettings::default(),
        );
        assert_eq!(dists(&targets), vec!["loki"]);
    }

    #[test]
    fn test_ref_prefixes_are_stripped() {
        let targets = resolve_matrix(
            ["refs/heads/deb-packaging-odin", "origin/deb-packaging"],
            &MatrixSettings::default(),
        );
        assert_eq!(dists(&targets), vec!["odin", "juno"]);
    }

    #[test]
    fn test_empty_distribution_suffix_is_ignored() {
        let targets = resolve_matrix(["deb-packaging-"], &MatrixSettings::default());
        assert_eq!(targets, vec![BuildTarget::amd64("juno")]);
    }

    #[test]
    fn test_custom_settings() {
        let settings = MatrixSettings {
            branch_prefix: "packaging".into(),
            default_distribution: "odin".into(),
            architecture: "arm64".into(),
        };
        let targets = resolve_matrix(["packaging-horus", "packaging"], &settings);
        assert_eq!(
            targets,
            vec![
                BuildTarget::new("horus", "arm64"),
                BuildTarget::new("odin", "arm64"),
            ]
        );
    }

    #[test]
    fn test_short_branch() {
        assert_eq!(short_branch("refs/heads/main"), "main");
        assert_eq!(short_branch("origin/main"), "main");
        assert_eq!(short_branch("refs/remotes/origin/main"), "main");
        assert_eq!(short_branch("main"), "main");
    }
}
