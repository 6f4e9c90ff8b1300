//! Director against a mock GitHub and package repository server.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Json;
use chrono::Utc;
use packforge::director::{
    Director, DirectorDeps, GitHubClient, PackageRepository, RepositoryClient,
};
use packforge::findings::{Finding, FindingLog};
use packforge::pipeline::units::ProjectConfig;
use packforge::pipeline::{Artifact, BuildRequest, RepositoryHandle, RunReport};
use packforge::templates::Template;
use packforge_common::{BuildTarget, Level, PackageIdentity, PackageType};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    query: Option<String>,
    content_type: Option<String>,
    authorization: Option<String>,
    body: Vec<u8>,
}

impl Call {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

struct Mock {
    calls: Mutex<Vec<Call>>,
    label_status: StatusCode,
    issue_status: StatusCode,
    release_status: StatusCode,
    files_status: StatusCode,
}

impl Default for Mock {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            label_status: StatusCode::UNPROCESSABLE_ENTITY,
            issue_status: StatusCode::CREATED,
            release_status: StatusCode::OK,
            files_status: StatusCode::CREATED,
        }
    }
}

impl Mock {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect()
    }
}

async fn handle(
    State(mock): State<Arc<Mock>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = uri.path().to_string();
    mock.calls.lock().unwrap().push(Call {
        method: method.clone(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        content_type: header("content-type"),
        authorization: header("authorization"),
        body: body.to_vec(),
    });

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method.as_str(), segments.as_slice()) {
        ("POST", ["repos", _, _, "labels"]) => {
            (mock.label_status, Json(json!({"message": "Validation Failed"})))
        }
        ("POST", ["repos", owner, repo, "issues"]) => (
            mock.issue_status,
            Json(json!({
                "number": 12,
                "html_url": format!("https://github.com/{}/{}/issues/12", owner, repo),
            })),
        ),
        ("PATCH", ["repos", _, _, "issues", _]) => (StatusCode::OK, Json(json!({}))),
        ("GET", ["repos", _, _, "releases", "tags", _]) => {
            (mock.release_status, Json(json!({"id": 5})))
        }
        ("POST", ["repos", _, _, "releases", "5", "assets"]) => (
            StatusCode::CREATED,
            Json(json!({"browser_download_url": format!("https://downloads/{}", uri.query().unwrap_or_default())})),
        ),
        ("PUT", ["files", _, _]) => (mock.files_status, Json(json!({}))),
        ("POST", ["publish"]) => (StatusCode::OK, Json(json!({"ok": true}))),
        _ => (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))),
    }
}

/// Serve `mock` on a random local port; returns its base URL.
async fn serve(mock: Arc<Mock>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(handle).with_state(mock);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn director(base: &str, with_repository: bool) -> Director {
    let package_repository = with_repository.then(|| {
        Arc::new(RepositoryClient::new(format!("{}/", base), Some("repo-token".into())))
            as Arc<dyn PackageRepository>
    });
    Director::new(DirectorDeps {
        source_host: Arc::new(GitHubClient::new(base, base, Some("gh-token".into()))),
        package_repository,
    })
}

fn artifact(dir: &Path, name: &str) -> Artifact {
    let path = dir.join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    Artifact {
        name: name.to_string(),
        path,
        sha256: String::new(),
        size: name.len() as u64,
    }
}

fn report(dir: &Path, findings: Vec<Finding>) -> RunReport {
    let mut log = FindingLog::default();
    for finding in findings {
        log.push(finding);
    }
    RunReport {
        id: Uuid::new_v4(),
        request: BuildRequest {
            repository: RepositoryHandle {
                url: "https://github.com/someone/app.git".into(),
                reference: "1.0.0".into(),
            },
            package: PackageIdentity::new("com.github.someone.app", "1.0.0", PackageType::App)
                .unwrap(),
        },
        target: BuildTarget::amd64("juno"),
        passes: log.passes(),
        aborted: None,
        findings: log,
        data: BTreeMap::new(),
        units: Vec::new(),
        artifacts: vec![
            artifact(dir, "com.github.someone.app_1.0.0_amd64.deb"),
            artifact(dir, "com.github.someone.app_1.0.0_amd64.buildinfo"),
        ],
        started_at: Utc::now(),
        finished_at: Utc::now(),
    }
}

fn config(github: bool, elementary: bool, log: Option<Level>) -> ProjectConfig {
    let mut config = ProjectConfig::default();
    config.endpoints.github = github;
    config.endpoints.elementary = elementary;
    if let Some(level) = log {
        config.log.enabled = true;
        config.log.level = level;
        config.log.label = "review".into();
    }
    config
}

fn warning() -> Finding {
    Finding::warn(
        Template::AppstreamReleaseMissing,
        json!({"version": "1.0.0"}),
    )
}

fn error() -> Finding {
    Finding::error(
        Template::DesktopMissing,
        json!({"path": "usr/share/applications/com.github.someone.app.desktop"}),
    )
}

#[tokio::test]
async fn test_existing_label_still_files_and_labels_issue() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(Mock::default());
    let base = serve(mock.clone()).await;

    let outcome = director(&base, false)
        .direct(&report(dir.path(), vec![error()]), &config(false, false, Some(Level::Error)))
        .await;

    assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
    let issue = outcome.issue.unwrap();
    assert_eq!(issue.number, 12);
    assert_eq!(
        mock.paths(),
        vec![
            "POST /repos/someone/app/labels",
            "POST /repos/someone/app/issues",
            "PATCH /repos/someone/app/issues/12",
        ]
    );

    let calls = mock.calls();
    assert_eq!(calls[0].json()["name"], "review");
    assert_eq!(calls[0].json()["color"], "e74c3c");
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer gh-token"));
    let body = calls[1].json();
    assert_eq!(body["title"], "Review of com.github.someone.app 1.0.0 for juno");
    assert!(body["body"].as_str().unwrap().contains("## error (1)"));
    assert_eq!(calls[2].json()["labels"], json!(["review"]));
}

#[tokio::test]
async fn test_label_server_error_files_unlabelled_issue() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(Mock {
        label_status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Default::default()
    });
    let base = serve(mock.clone()).await;

    let outcome = director(&base, false)
        .direct(&report(dir.path(), vec![error()]), &config(false, false, Some(Level::Error)))
        .await;

    assert_eq!(outcome.issue.map(|i| i.number), Some(12));
    assert!(!mock.paths().iter().any(|p| p.starts_with("PATCH")));
}

#[tokio::test]
async fn test_publish_uploads_only_packages() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(Mock::default());
    let base = serve(mock.clone()).await;
    let report = report(dir.path(), vec![]);

    let outcome = director(&base, true)
        .direct(&report, &config(false, true, None))
        .await;

    assert!(outcome.published);
    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, Method::PUT);
    assert_eq!(
        calls[0].path,
        format!("/files/{}/com.github.someone.app_1.0.0_amd64.deb", report.id)
    );
    assert_eq!(calls[0].body, b"com.github.someone.app_1.0.0_amd64.deb");
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer repo-token"));
    assert_eq!(calls[1].path, "/publish");
    assert_eq!(
        calls[1].json(),
        json!({"directory": report.id.to_string(), "distribution": "juno"})
    );
}

#[tokio::test]
async fn test_failing_publish_does_not_suppress_report() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(Mock {
        files_status: StatusCode::SERVICE_UNAVAILABLE,
        ..Default::default()
    });
    let base = serve(mock.clone()).await;

    let outcome = director(&base, true)
        .direct(
            &report(dir.path(), vec![warning()]),
            &config(false, true, Some(Level::Warn)),
        )
        .await;

    assert!(!outcome.published);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("503"));
    assert!(outcome.issue.is_some());
    assert!(!mock.paths().contains(&"POST /publish".to_string()));
}

#[tokio::test]
async fn test_failing_report_does_not_suppress_release() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(Mock {
        issue_status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Default::default()
    });
    let base = serve(mock.clone()).await;

    let outcome = director(&base, false)
        .direct(
            &report(dir.path(), vec![warning()]),
            &config(true, false, Some(Level::Warn)),
        )
        .await;

    assert!(outcome.issue.is_none());
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].starts_with("report:"));
    assert_eq!(outcome.released.len(), 2);

    let uploads: Vec<Call> = mock
        .calls()
        .into_iter()
        .filter(|c| c.path.ends_with("/assets"))
        .collect();
    assert_eq!(uploads.len(), 2);
    assert_eq!(
        uploads[0].query.as_deref(),
        Some("name=com.github.someone.app_1.0.0_amd64.deb")
    );
    assert_eq!(
        uploads[0].content_type.as_deref(),
        Some("application/vnd.debian.binary-package")
    );
}

#[tokio::test]
async fn test_missing_release_is_recorded() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(Mock {
        release_status: StatusCode::NOT_FOUND,
        ..Default::default()
    });
    let base = serve(mock.clone()).await;

    let outcome = director(&base, false)
        .direct(&report(dir.path(), vec![]), &config(true, false, None))
        .await;

    assert!(outcome.released.is_empty());
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("No release found for tag '1.0.0'"));
}
