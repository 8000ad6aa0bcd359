//! Publish adapter: push the exception file to object storage
//!
//! Upload is an HTTP `PUT` to `<endpoint>/<bucket>/<prefix>/<file>` followed
//! by a `HEAD` on the same URL. Once verified, the local file is moved into an
//! `uploaded/` subdirectory next to it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use secrecon_common::config::PublishConfig;
use tracing::{debug, info, warn};

use crate::error::PublishError;

/// Where a published artifact ended up
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedArtifact {
    /// `s3://<bucket>/<key>`
    pub uri: String,
    /// Local copy after the move to `uploaded/`
    pub local_path: PathBuf,
}

/// Upload collaborator
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<PublishedArtifact, PublishError>;
}

/// Object-store publisher speaking plain HTTP PUT/HEAD
#[derive(Debug, Clone)]
pub struct HttpObjectPublisher {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: String,
}

impl HttpObjectPublisher {
    pub fn from_config(config: &PublishConfig) -> Result<Self, PublishError> {
        let bucket = config
            .bucket
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| PublishError::NotConfigured("no bucket configured".to_string()))?;
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| PublishError::NotConfigured("no endpoint configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PublishError::Transport(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            prefix: config.prefix.trim_matches('/').to_string(),
        })
    }

    /// Object key for a local file name
    pub fn object_key(&self, file_name: &str) -> String {
        if self.prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl Publisher for HttpObjectPublisher {
    async fn upload(&self, path: &Path) -> Result<PublishedArtifact, PublishError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PublishError::MissingArtifact(path.to_path_buf()))?;

        let body = tokio::fs::read(path)
            .await
            .map_err(|_| PublishError::MissingArtifact(path.to_path_buf()))?;

        let key = self.object_key(file_name);
        let url = self.object_url(&key);
        debug!(url = %url, bytes = body.len(), "Uploading artifact");

        let response = self
            .client
            .put(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(format!("PUT {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(PublishError::Transport(format!("PUT {}: HTTP {}", url, response.status())));
        }

        let head = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| PublishError::Verification(format!("HEAD {}: {}", url, e)))?;
        if !head.status().is_success() {
            return Err(PublishError::Verification(format!("HEAD {}: HTTP {}", url, head.status())));
        }

        let uri = format!("s3://{}/{}", self.bucket, key);
        let local_path = move_to_uploaded(path, file_name).await;

        info!(uri = %uri, "Artifact published");
        Ok(PublishedArtifact { uri, local_path })
    }
}

/// Move into `uploaded/`. The object is already verified, so a failed move
/// only leaves the file where it was.
async fn move_to_uploaded(path: &Path, file_name: &str) -> PathBuf {
    let dir = path.parent().unwrap_or(Path::new(".")).join("uploaded");
    let dest = dir.join(file_name);

    let moved = match tokio::fs::create_dir_all(&dir).await {
        Ok(()) => tokio::fs::rename(path, &dest).await,
        Err(e) => Err(e),
    };

    match moved {
        Ok(()) => dest,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not move published artifact to uploaded/");
            path.to_path_buf()
        }
    }
}
