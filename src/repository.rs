//! Source repository access.
//!
//! The pipeline only needs two things from a source repository: a checkout of
//! one reference into the workspace, and the list of branches for the build
//! matrix. [`GitRepository`] does both with libgit2; [`DirectorySource`]
//! serves a plain local tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{Direction, Object, Remote};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::PipelineError;

/// A source repository a pipeline can fetch.
#[async_trait]
pub trait Repository: Send + Sync {
    fn url(&self) -> &str;

    /// Check out `reference` (branch, tag or commit) into `dest`.
    async fn fetch_into(&self, dest: &Path, reference: &str) -> Result<(), PipelineError>;

    /// Branch references, as `refs/heads/<name>`.
    async fn references(&self) -> Result<Vec<String>, PipelineError>;
}

/// Pick the repository implementation for `location`.
///
/// A local directory that is not a git work tree is served as-is; anything
/// else goes through libgit2.
pub fn open(location: &str) -> Arc<dyn Repository> {
    let path = Path::new(location);
    if path.is_dir() && !path.join(".git").exists() && !path.join("HEAD").is_file() {
        Arc::new(DirectorySource::new(path))
    } else {
        Arc::new(GitRepository::new(location))
    }
}

/// Repository reachable through git.
#[derive(Debug, Clone)]
pub struct GitRepository {
    url: String,
}

impl GitRepository {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn clone_error(&self, reference: &str, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::Clone {
            url: self.url.clone(),
            reference: reference.to_string(),
            message: err.to_string(),
        }
    }
}

fn resolve<'r>(repo: &'r git2::Repository, reference: &str) -> Result<Object<'r>, git2::Error> {
    let candidates = [
        format!("refs/remotes/origin/{}", reference),
        format!("refs/tags/{}", reference),
        reference.to_string(),
    ];
    let mut last = None;
    for candidate in &candidates {
        match repo.revparse_single(candidate) {
            Ok(object) => return Ok(object),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| git2::Error::from_str("reference not found")))
}

fn checkout(url: &str, dest: &Path, reference: &str) -> Result<(), git2::Error> {
    let repo = git2::Repository::clone(url, dest)?;
    let object = resolve(&repo, reference)?;
    let commit = object.peel_to_commit()?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(commit.id())?;
    Ok(())
}

fn list_branches(url: &str) -> Result<Vec<String>, git2::Error> {
    let mut remote = Remote::create_detached(url)?;
    remote.connect(Direction::Fetch)?;
    let branches = remote
        .list()?
        .iter()
        .map(|head| head.name().to_string())
        .filter(|name| name.starts_with("refs/heads/"))
        .collect();
    remote.disconnect()?;
    Ok(branches)
}

#[async_trait]
impl Repository for GitRepository {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_into(&self, dest: &Path, reference: &str) -> Result<(), PipelineError> {
        let url = self.url.clone();
        let dest = dest.to_path_buf();
        let owned_reference = reference.to_string();
        debug!(url = %url, reference, "cloning");
        tokio::task::spawn_blocking(move || checkout(&url, &dest, &owned_reference))
            .await
            .map_err(|e| self.clone_error(reference, e))?
            .map_err(|e| self.clone_error(reference, e.message()))
    }

    async fn references(&self) -> Result<Vec<String>, PipelineError> {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || list_branches(&url))
            .await
            .map_err(|e| self.clone_error("refs/heads/*", e))?
            .map_err(|e| self.clone_error("refs/heads/*", e.message()))
    }
}

/// A local directory served as a repository with a fixed branch list.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    url: String,
    branches: Vec<String>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            url: root.display().to_string(),
            root,
            branches: vec!["refs/heads/master".to_string()],
        }
    }

    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.branches = branches
            .into_iter()
            .map(|b| format!("refs/heads/{}", crate::matrix::short_branch(b.as_ref())))
            .collect();
        self
    }
}

fn copy_tree(root: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Repository for DirectorySource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_into(&self, dest: &Path, reference: &str) -> Result<(), PipelineError> {
        let error = |message: String| PipelineError::Clone {
            url: self.url.clone(),
            reference: reference.to_string(),
            message,
        };
        if !self.root.is_dir() {
            return Err(error("source directory does not exist".to_string()));
        }
        let root = self.root.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&root, &dest))
            .await
            .map_err(|e| error(e.to_string()))?
            .map_err(|e| error(e.to_string()))
    }

    async fn references(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.branches.clone())
    }
}
