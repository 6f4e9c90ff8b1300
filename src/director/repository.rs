//! HTTP client for the package repository.
//!
//! Packages are staged one file at a time under a directory named after the
//! run, then published to a distribution in a single call:
//!
//! ```text
//! PUT  {base}/files/{directory}/{file}
//! POST {base}/publish   {"directory": ..., "distribution": ...}
//! ```

use async_trait::async_trait;
use serde_json::json;

use super::PackageRepository;
use crate::errors::PublishError;
use crate::pipeline::Artifact;

const ENDPOINT: &str = "package repository";

#[derive(Debug, Clone)]
pub struct RepositoryClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RepositoryClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("User-Agent", "packforge");
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<(), PublishError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(PublishError::Http {
            endpoint: ENDPOINT,
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl PackageRepository for RepositoryClient {
    async fn upload(&self, directory: &str, artifact: &Artifact) -> Result<(), PublishError> {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| PublishError::Io {
                path: artifact.path.clone(),
                source,
            })?;
        let url = format!("{}/files/{}/{}", self.base_url, directory, artifact.name);
        tracing::debug!(%url, size = bytes.len(), "uploading package");
        let response = self
            .with_auth(self.client.put(&url))
            .header("Content-Type", super::DEB_CONTENT_TYPE)
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn publish(&self, directory: &str, distribution: &str) -> Result<(), PublishError> {
        let url = format!("{}/publish", self.base_url);
        let response = self
            .with_auth(self.client.post(&url))
            .json(&json!({"directory": directory, "distribution": distribution}))
            .send()
            .await?;
        Self::check(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = RepositoryClient::new("https://repo.example.org/api/", None);
        assert_eq!(client.base_url(), "https://repo.example.org/api");
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_is_an_io_error() {
        let client = RepositoryClient::new("http://127.0.0.1:9", Some("t".into()));
        let artifact = Artifact {
            name: "gone.deb".into(),
            path: "/nonexistent/gone.deb".into(),
            sha256: String::new(),
            size: 0,
        };
        let err = client.upload("run", &artifact).await.unwrap_err();
        assert!(matches!(err, PublishError::Io { .. }));
    }
}
