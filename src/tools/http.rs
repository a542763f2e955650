//! Plain HTTP transfers: file downloads and the release manifest check

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::downloader::validate_url;
use crate::error::InvokeError;
use crate::process::CancelToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetch `url` into `destination`
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    id: Uuid,
    pub url: String,
    pub destination: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            destination: destination.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Outcome of one download
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub request_id: Uuid,
    pub url: String,
    pub destination: PathBuf,
    pub bytes_written: u64,
    pub error: Option<InvokeError>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn status_line(&self) -> String {
        match &self.error {
            None => format!(
                "downloaded {} bytes to {}",
                self.bytes_written,
                self.destination.display()
            ),
            Some(e) => format!("download failed: {}", e),
        }
    }
}

/// Latest-release description published as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ReleaseManifest {
    /// Compare dotted versions numerically ("1.10.0" > "1.9.3")
    pub fn is_newer_than(&self, current: &str) -> bool {
        version_parts(&self.version) > version_parts(current)
    }
}

/// Numeric components with trailing zeros dropped, so "1.10.0" equals "1.10"
fn version_parts(version: &str) -> Vec<u64> {
    let mut parts: Vec<u64> = version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split(['.', '-', '+'])
        .map_while(|part| part.parse::<u64>().ok())
        .collect();
    while parts.last() == Some(&0) {
        parts.pop();
    }
    parts
}

pub fn build_client() -> Result<reqwest::Client, InvokeError> {
    reqwest::Client::builder()
        .user_agent(concat!("mediawrap/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| InvokeError::network(format!("Failed to build HTTP client: {}", e)))
}

/// Sibling temp file the body is streamed into before the final rename
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!(".{}.part", name))
}

async fn transfer(client: &reqwest::Client, request: &DownloadRequest, partial: &Path) -> Result<u64, InvokeError> {
    let url = validate_url(&request.url)?;
    if request.destination.file_name().is_none() {
        return Err(InvokeError::invalid(format!(
            "destination has no file name: {}",
            request.destination.display()
        )));
    }

    if let Some(parent) = request.destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InvokeError::io(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| InvokeError::network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(InvokeError::network(format!("HTTP {} for {}", status, request.url)));
    }

    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| InvokeError::io(format!("Failed to create {}: {}", partial.display(), e)))?;

    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| InvokeError::network(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| InvokeError::io(format!("Failed to write {}: {}", partial.display(), e)))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| InvokeError::io(format!("Failed to flush {}: {}", partial.display(), e)))?;
    drop(file);

    tokio::fs::rename(partial, &request.destination)
        .await
        .map_err(|e| InvokeError::io(format!("Failed to move download into place: {}", e)))?;

    Ok(written)
}

/// Download a file, streaming the body to disk
///
/// The destination only appears once the whole body has arrived; failures
/// and cancellation remove the partial file.
pub async fn download(client: &reqwest::Client, request: &DownloadRequest, cancel: &CancelToken) -> DownloadReport {
    let started_at = Local::now();
    let partial = partial_path(&request.destination);

    let outcome = if cancel.is_cancelled() {
        Err(InvokeError::Cancelled)
    } else {
        log::debug!("[{}] GET {} -> {}", request.id, request.url, request.destination.display());
        tokio::select! {
            result = transfer(client, request, &partial) => result,
            _ = cancel.cancelled() => Err(InvokeError::Cancelled),
        }
    };

    let (bytes_written, error) = match outcome {
        Ok(bytes) => {
            log::info!("[{}] downloaded {} bytes from {}", request.id, bytes, request.url);
            (bytes, None)
        }
        Err(e) => {
            log::warn!("[{}] download of {} failed: {}", request.id, request.url, e);
            if partial.exists() {
                let _ = tokio::fs::remove_file(&partial).await;
            }
            (0, Some(e))
        }
    };

    DownloadReport {
        request_id: request.id,
        url: request.url.clone(),
        destination: request.destination.clone(),
        bytes_written,
        error,
        started_at,
        finished_at: Local::now(),
    }
}

/// Fetch and decode the release manifest at `url`
pub async fn fetch_release_manifest(client: &reqwest::Client, url: &str) -> Result<ReleaseManifest, InvokeError> {
    let url = validate_url(url)?;
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| InvokeError::network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(InvokeError::network(format!("HTTP {} for {}", status, url)));
    }
    let body = response
        .text()
        .await
        .map_err(|e| InvokeError::network(e.to_string()))?;

    serde_json::from_str(&body)
        .map_err(|e| InvokeError::network(format!("Malformed release manifest: {}", e)))
}
