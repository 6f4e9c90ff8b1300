//! Per-run scratch directory.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::PipelineError;

const SUBDIRS: [&str; 5] = ["repository", "build", "extract", "package", "logs"];

/// `<root>/<run id>/{repository,build,extract,package,logs}`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(parent: &Path, run_id: Uuid) -> Self {
        Self {
            root: parent.join(run_id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checked-out source tree.
    pub fn repository(&self) -> PathBuf {
        self.root.join("repository")
    }

    /// Output directory of the package build.
    pub fn build(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Unpacked package contents.
    pub fn extract(&self) -> PathBuf {
        self.root.join("extract")
    }

    /// Repacked packages.
    pub fn package(&self) -> PathBuf {
        self.root.join("package")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    pub async fn create(&self) -> Result<(), PipelineError> {
        for dir in SUBDIRS {
            let path = self.root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| PipelineError::Workspace { path, source })?;
        }
        Ok(())
    }

    /// Remove the whole tree. Removing a missing workspace is not an error.
    pub async fn remove(&self) -> Result<(), PipelineError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::Workspace {
                path: self.root.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), Uuid::new_v4());
        workspace.create().await.unwrap();

        assert!(workspace.repository().is_dir());
        assert!(workspace.build().is_dir());
        assert!(workspace.extract().is_dir());
        assert!(workspace.package().is_dir());
        assert!(workspace.logs().is_dir());

        workspace.remove().await.unwrap();
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), Uuid::new_v4());
        workspace.remove().await.unwrap();
        workspace.create().await.unwrap();
        workspace.remove().await.unwrap();
        workspace.remove().await.unwrap();
    }

    #[test]
    fn test_workspace_is_named_after_run() {
        let id = Uuid::new_v4();
        let workspace = Workspace::new(Path::new("/tmp/packforge"), id);
        assert_eq!(workspace.root(), Path::new("/tmp/packforge").join(id.to_string()));
    }
}
