//! Pipeline orchestrator.
//!
//! A [`Pipeline`] is the context of one run: one build request built for one
//! target. It owns the workspace, the per-unit data store, the findings log
//! and the table of produced artifacts.
//!
//! ## Lifecycle
//!
//! ```text
//! setup()     create <workspace_root>/<run id>/..., fetch the source tree
//! run(tasks)  require each unit in order, stop at the first run abort
//! collect     copy artifacts to <artifact_dir>/<run id>/ with checksums
//! teardown()  remove the workspace (every exit path, idempotent)
//! ```
//!
//! [`Pipeline::execute`] drives all four and never fails: every problem ends
//! up as a finding in the returned [`RunReport`].
//!
//! ## Units
//!
//! Units call [`Pipeline::require`] to obtain the output of another unit.
//! Each unit runs at most once per run; later calls return the memoized
//! `Arc`. A unit that stops early leaves its seeded default output behind.

pub mod tasks;
pub mod unit;
pub mod units;
pub mod workspace;

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use packforge_common::{BuildTarget, PackageIdentity};
use packforge_runtime::Sandbox;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::errors::{Interrupt, PipelineError, RunAbort};
use crate::findings::{Finding, FindingLog};
use crate::repository::Repository;
use crate::settings::Settings;
use crate::templates::Template;

pub use tasks::{Task, TaskList};
pub use unit::{Unit, UnitState};
pub use workspace::Workspace;

/// Source repository location and the reference to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHandle {
    pub url: String,
    /// Branch, tag or commit.
    pub reference: String,
}

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub repository: RepositoryHandle,
    pub package: PackageIdentity,
}

/// Collaborators handed to every pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub settings: Arc<Settings>,
    pub sandbox: Arc<Sandbox>,
    pub repository: Arc<dyn Repository>,
}

/// A produced file after it was copied out of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

impl Artifact {
    /// Whether this is a Debian package.
    pub fn is_package(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "deb")
    }
}

/// Where and why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    pub unit: String,
    pub reason: String,
}

impl From<&RunAbort> for AbortInfo {
    fn from(abort: &RunAbort) -> Self {
        Self {
            unit: abort.unit.clone(),
            reason: abort.reason.clone(),
        }
    }
}

/// Final state of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub name: String,
    pub state: UnitState,
}

/// Serializable result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub id: Uuid,
    pub request: BuildRequest,
    pub target: BuildTarget,
    pub passes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortInfo>,
    pub findings: FindingLog,
    pub data: BTreeMap<String, Value>,
    /// Units in the order they started.
    pub units: Vec<UnitRecord>,
    pub artifacts: Vec<Artifact>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn passes(&self) -> bool {
        self.passes
    }

    pub fn fails(&self) -> bool {
        !self.passes
    }

    /// Artifacts that are Debian packages.
    pub fn packages(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| a.is_package())
    }

    pub fn unit_state(&self, name: &str) -> Option<UnitState> {
        self.units.iter().find(|u| u.name == name).map(|u| u.state)
    }

    /// Decode a unit's output from the data store.
    pub fn output<T: DeserializeOwned>(&self, unit: &str) -> Option<T> {
        self.data
            .get(unit)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Context of one run.
pub struct Pipeline {
    id: Uuid,
    request: BuildRequest,
    target: BuildTarget,
    settings: Arc<Settings>,
    sandbox: Arc<Sandbox>,
    repository: Arc<dyn Repository>,
    workspace: Workspace,
    data: BTreeMap<String, Value>,
    findings: FindingLog,
    states: Vec<(&'static str, UnitState)>,
    memo: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    stack: Vec<(TypeId, &'static str)>,
    artifacts: BTreeMap<String, PathBuf>,
    abort: Option<RunAbort>,
    started_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(request: BuildRequest, target: BuildTarget, deps: PipelineDeps) -> Self {
        let id = Uuid::new_v4();
        let workspace = Workspace::new(&deps.settings.service.workspace_root, id);
        Self {
            id,
            request,
            target,
            settings: deps.settings,
            sandbox: deps.sandbox,
            repository: deps.repository,
            workspace,
            data: BTreeMap::new(),
            findings: FindingLog::default(),
            states: Vec::new(),
            memo: HashMap::new(),
            stack: Vec::new(),
            artifacts: BTreeMap::new(),
            abort: None,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &BuildRequest {
        &self.request
    }

    pub fn package(&self) -> &PackageIdentity {
        &self.request.package
    }

    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn findings(&self) -> &FindingLog {
        &self.findings
    }

    pub fn passes(&self) -> bool {
        self.findings.passes()
    }

    pub fn fails(&self) -> bool {
        self.findings.fails()
    }

    pub fn aborted(&self) -> Option<&RunAbort> {
        self.abort.as_ref()
    }

    pub fn state_of(&self, unit: &str) -> Option<UnitState> {
        self.states
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, state)| *state)
    }

    /// Produced files by file name.
    pub fn artifacts(&self) -> &BTreeMap<String, PathBuf> {
        &self.artifacts
    }

    fn current_unit(&self) -> &'static str {
        self.stack.last().map(|(_, name)| *name).unwrap_or("pipeline")
    }

    fn set_state(&mut self, unit: &'static str, state: UnitState) {
        match self.states.iter_mut().find(|(name, _)| *name == unit) {
            Some(entry) => entry.1 = state,
            None => self.states.push((unit, state)),
        }
    }

    /// Append a finding, stamped with the unit currently running.
    pub fn report(&mut self, mut finding: Finding) {
        finding.stamp_unit(self.current_unit());
        debug!(
            level = %finding.level(),
            template = %finding.template(),
            unit = finding.unit().unwrap_or_default(),
            "{}",
            finding.title()
        );
        self.findings.push(finding);
    }

    /// Record `finding` as critical and return the interrupt that aborts the run.
    pub fn critical(&mut self, finding: Finding) -> Interrupt {
        let finding = finding.critical();
        let reason = finding.title().to_string();
        self.report(finding);
        Interrupt::Run(RunAbort {
            unit: self.current_unit().to_string(),
            reason,
            recorded: true,
        })
    }

    /// Register a produced file. A later file with the same name replaces it.
    pub fn produce(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            warn!(path = %path.display(), "ignoring artifact without a file name");
            return;
        };
        if let Some(previous) = self.artifacts.insert(name.clone(), path.clone()) {
            debug!(artifact = %name, previous = %previous.display(), "artifact replaced");
        }
    }

    /// Obtain the output of unit `U`, running it if it has not run yet.
    ///
    /// Only run-aborting outcomes surface as `Err`; a unit that stops or fails
    /// on its own yields its default output.
    pub async fn require<U: Unit>(&mut self) -> Result<Arc<U::Output>, RunAbort> {
        let key = TypeId::of::<U>();
        if let Some(output) = self
            .memo
            .get(&key)
            .and_then(|done| Arc::clone(done).downcast::<U::Output>().ok())
        {
            return Ok(output);
        }

        if self.stack.iter().any(|(id, _)| *id == key) {
            return Err(self.record_cycle(U::NAME));
        }
        if let Some(abort) = &self.abort {
            return Err(abort.clone());
        }

        let unit = U::default();
        self.data.insert(
            U::NAME.to_string(),
            serde_json::to_value(U::Output::default()).unwrap_or(Value::Null),
        );
        self.set_state(U::NAME, UnitState::Constructed);
        self.set_state(U::NAME, UnitState::Running);
        self.stack.push((key, U::NAME));

        let span = info_span!("unit", unit = U::NAME);
        let result = AssertUnwindSafe(unit.run(self).instrument(span))
            .catch_unwind()
            .await;
        self.stack.pop();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => Err(Interrupt::Run(RunAbort::new(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )))),
        };

        match outcome {
            Ok(output) => {
                self.set_state(U::NAME, UnitState::Completed);
                Ok(self.finish::<U>(output))
            }
            Err(Interrupt::Unit) => {
                debug!(unit = U::NAME, "unit stopped early");
                self.set_state(U::NAME, UnitState::Errored { critical: false });
                Ok(self.finish::<U>(U::Output::default()))
            }
            Err(Interrupt::Failed(err)) => {
                warn!(unit = U::NAME, error = %err, "unit failed");
                let mut finding = Finding::error(
                    Template::UnitFailed,
                    json!({"unit": U::NAME, "message": format!("{:#}", err)}),
                )
                .with_error(&err);
                finding.stamp_unit(U::NAME);
                self.report(finding);
                self.set_state(U::NAME, UnitState::Errored { critical: false });
                Ok(self.finish::<U>(U::Output::default()))
            }
            Err(Interrupt::Run(mut abort)) => {
                if abort.unit.is_empty() {
                    abort.unit = U::NAME.to_string();
                }
                if !abort.recorded {
                    let mut finding = Finding::error(
                        Template::RunAborted,
                        json!({"unit": abort.unit, "reason": abort.reason}),
                    )
                    .critical();
                    finding.stamp_unit(U::NAME);
                    self.report(finding);
                    abort.recorded = true;
                }
                warn!(unit = %abort.unit, reason = %abort.reason, "run aborted");
                self.set_state(U::NAME, UnitState::Errored { critical: true });
                self.abort = Some(abort.clone());
                Err(abort)
            }
        }
    }

    fn finish<U: Unit>(&mut self, output: U::Output) -> Arc<U::Output> {
        let value = serde_json::to_value(&output).unwrap_or(Value::Null);
        self.data.insert(U::NAME.to_string(), value);
        let output = Arc::new(output);
        self.memo.insert(
            TypeId::of::<U>(),
            Arc::clone(&output) as Arc<dyn Any + Send + Sync>,
        );
        output
    }

    fn record_cycle(&mut self, unit: &'static str) -> RunAbort {
        let mut chain: Vec<&str> = self.stack.iter().map(|(_, name)| *name).collect();
        chain.push(unit);
        let chain = chain.join(" -> ");
        self.report(
            Finding::error(Template::UnitCycle, json!({"unit": unit, "chain": chain})).critical(),
        );
        let abort = RunAbort {
            unit: unit.to_string(),
            reason: format!("dependency cycle: {}", chain),
            recorded: true,
        };
        self.abort = Some(abort.clone());
        abort
    }

    /// Create the workspace and fetch the source tree into it.
    ///
    /// A failure is recorded as a critical `setup-failed` finding.
    pub async fn setup(&mut self) -> Result<(), PipelineError> {
        let result = self.prepare().await;
        if let Err(err) = &result {
            warn!(error = %err, "setup failed");
            let finding = Finding::error(Template::SetupFailed, json!({"reason": err.to_string()}))
                .critical()
                .with_dump(format!("{:?}", err));
            self.report(finding);
            self.abort = Some(RunAbort {
                unit: "setup".to_string(),
                reason: err.to_string(),
                recorded: true,
            });
        }
        result
    }

    async fn prepare(&mut self) -> Result<(), PipelineError> {
        self.workspace.create().await?;
        info!(
            url = %self.request.repository.url,
            reference = %self.request.repository.reference,
            "fetching source"
        );
        self.repository
            .fetch_into(
                &self.workspace.repository(),
                &self.request.repository.reference,
            )
            .await
    }

    /// Require every task in order. Stops at the first run abort.
    pub async fn run(&mut self, tasks: &TaskList) -> Result<(), RunAbort> {
        for task in tasks.tasks() {
            if let Some(abort) = &self.abort {
                return Err(abort.clone());
            }
            task.call(self).await?;
        }
        Ok(())
    }

    /// Remove the workspace. Safe to call more than once.
    pub async fn teardown(&mut self) {
        match self.workspace.remove().await {
            Ok(()) => debug!(workspace = %self.workspace.root().display(), "workspace removed"),
            Err(err) => warn!(error = %err, "failed to remove workspace"),
        }
    }

    /// Copy produced files out of the workspace and checksum them.
    async fn collect_artifacts(&mut self) -> Vec<Artifact> {
        if self.artifacts.is_empty() {
            return Vec::new();
        }
        let dest = self.settings.service.artifact_dir.join(self.id.to_string());
        let produced: Vec<(String, PathBuf)> = self
            .artifacts
            .iter()
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect();

        let mut collected = Vec::with_capacity(produced.len());
        for (name, source) in produced {
            match copy_artifact(&source, &dest.join(&name)).await {
                Ok(artifact) => collected.push(artifact),
                Err(err) => {
                    warn!(artifact = %name, error = %err, "failed to collect artifact");
                    self.report(
                        Finding::error(
                            Template::UnitFailed,
                            json!({"unit": "artifacts", "message": err.to_string()}),
                        )
                        .with_error(&err),
                    );
                }
            }
        }
        collected
    }

    /// Run the whole lifecycle and produce the report.
    ///
    /// The workspace is removed on every path, including setup failures and
    /// aborted runs.
    pub async fn execute(mut self, tasks: &TaskList) -> RunReport {
        let span = info_span!(
            "run",
            run_id = %self.id,
            package = %self.request.package.name,
            distribution = %self.target.distribution
        );
        async move {
            info!(build_target = %self.target, tasks = ?tasks.names(), "run started");
            if self.setup().await.is_ok() {
                let _ = self.run(tasks).await;
            }
            let artifacts = self.collect_artifacts().await;
            self.teardown().await;

            let report = self.into_report(artifacts);
            info!(
                passes = report.passes,
                summary = %report.findings.summary(),
                "run finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    fn into_report(self, artifacts: Vec<Artifact>) -> RunReport {
        RunReport {
            id: self.id,
            request: self.request,
            target: self.target,
            passes: self.findings.passes(),
            aborted: self.abort.as_ref().map(AbortInfo::from),
            findings: self.findings,
            data: self.data,
            units: self
                .states
                .into_iter()
                .map(|(name, state)| UnitRecord {
                    name: name.to_string(),
                    state,
                })
                .collect(),
            artifacts,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

async fn copy_artifact(source: &Path, dest: &Path) -> Result<Artifact, PipelineError> {
    let err = |source: std::io::Error| PipelineError::Artifact {
        path: dest.to_path_buf(),
        source,
    };
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(err)?;
    }
    let bytes = tokio::fs::read(source).await.map_err(|source_err| PipelineError::Artifact {
        path: source.to_path_buf(),
        source: source_err,
    })?;
    tokio::fs::write(dest, &bytes).await.map_err(err)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(Artifact {
        name: dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: dest.to_path_buf(),
        sha256: format!("{:x}", hasher.finalize()),
        size: bytes.len() as u64,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
