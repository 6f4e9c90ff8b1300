//! Typed error hierarchy for packforge.
//!
//! Three groups cover the three places things go wrong:
//! - `Interrupt` / `RunAbort`: control flow out of a unit inside a run
//! - `PipelineError`: workspace, clone and artifact failures in the orchestrator
//! - `PublishError`: source host and package repository endpoint failures

use std::path::PathBuf;

use packforge_runtime::SandboxError;
use thiserror::Error;

/// A run stops here; remaining tasks are skipped and the workspace is torn down.
#[derive(Debug, Clone, Error)]
#[error("run aborted in {unit}: {reason}")]
pub struct RunAbort {
    /// Unit that aborted; filled in by the pipeline when empty.
    pub unit: String,
    pub reason: String,
    /// Whether a finding describing the abort is already in the log.
    pub recorded: bool,
}

impl RunAbort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            unit: String::new(),
            reason: reason.into(),
            recorded: false,
        }
    }
}

/// How a unit's entry point stopped short of producing its output.
#[derive(Debug, Error)]
pub enum Interrupt {
    /// Stop this unit only. Dependents see the unit's seeded defaults.
    #[error("unit stopped")]
    Unit,

    /// The unit could not complete its own check. Recorded as an error
    /// finding; siblings keep running.
    #[error("unit failed: {0}")]
    Failed(anyhow::Error),

    /// Abort the whole run.
    #[error(transparent)]
    Run(RunAbort),
}

impl From<RunAbort> for Interrupt {
    fn from(abort: RunAbort) -> Self {
        Interrupt::Run(abort)
    }
}

impl From<SandboxError> for Interrupt {
    fn from(err: SandboxError) -> Self {
        Interrupt::Run(RunAbort::new(err.to_string()))
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(err: anyhow::Error) -> Self {
        Interrupt::Failed(err)
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(err: std::io::Error) -> Self {
        Interrupt::Failed(err.into())
    }
}

/// Errors from the orchestrator around the task list.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to prepare workspace at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {url} at '{reference}': {message}")]
    Clone {
        url: String,
        reference: String,
        message: String,
    },

    #[error("Failed to collect artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the publish and report endpoints.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{endpoint} returned {status}: {message}")]
    Http {
        endpoint: &'static str,
        status: u16,
        message: String,
    },

    #[error("No token configured for {0}")]
    MissingToken(&'static str),

    #[error("No {0} endpoint configured")]
    NotConfigured(&'static str),

    #[error("No release found for tag '{0}'")]
    NoRelease(String),

    #[error("Cannot derive owner/repo from '{0}'")]
    NotGitHub(String),

    #[error("Failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
