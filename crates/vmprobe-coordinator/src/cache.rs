//! Local download cache for provisioning artifacts
//!
//! Idempotent fetch-if-stale: an item is downloaded only when it is missing
//! locally or its size differs from the remote `Content-Length`. Downloads
//! stream into a `.part` file that is renamed into place only once its size
//! checks out; a partial or corrupt file never survives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// One file to keep in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItem {
    pub url: String,
    /// File name inside the cache directory
    pub filename: String,
}

impl CacheItem {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// Artifacts the Rocky 9 VMs install from
pub fn default_items() -> Vec<CacheItem> {
    vec![
        CacheItem::new(
            "https://download.rockylinux.org/pub/rocky/9.5/isos/x86_64/Rocky-9-latest-x86_64-minimal.iso",
            "Rocky-9.5-x86_64-minimal.iso",
        ),
        CacheItem::new(
            "https://dl.fedoraproject.org/pub/epel/epel-release-latest-9.noarch.rpm",
            "epel-release-latest-9.noarch.rpm",
        ),
        CacheItem::new(
            "https://download.docker.com/linux/centos/docker-ce.repo",
            "docker-ce.repo",
        ),
    ]
}

/// Load a JSON manifest: an array of `{"url": ..., "filename": ...}`
pub fn load_manifest(path: &Path) -> Result<Vec<CacheItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let items: Vec<CacheItem> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    for item in &items {
        if Path::new(&item.filename).components().count() != 1 {
            bail!("Manifest file name must be a plain name: {}", item.filename);
        }
    }
    Ok(items)
}

/// Decide whether a cached file must be (re)downloaded.
///
/// Missing files always are; present files only when the remote size is
/// known and differs.
pub fn needs_update(local_size: Option<u64>, remote_size: Option<u64>) -> bool {
    match (local_size, remote_size) {
        (None, _) => true,
        (Some(local), Some(remote)) => local != remote,
        (Some(_), None) => false,
    }
}

/// Result of fetching one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Local copy already matches
    UpToDate,
    /// Downloaded this many bytes
    Downloaded(u64),
    /// Download finished with the wrong size and was deleted
    Corrupt { expected: u64, actual: u64 },
    /// Request or write failed
    Failed(String),
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::UpToDate | Self::Downloaded(_))
    }
}

/// Fills a cache directory from a list of items
pub struct CachePopulator {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl CachePopulator {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("vmprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Self::with_client(client, cache_dir)
    }

    pub fn with_client(client: reqwest::Client, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { client, cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fetch every item in order; one failure does not stop the rest
    pub async fn populate(&self, items: &[CacheItem]) -> Vec<(CacheItem, FetchOutcome)> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self.fetch(item).await;
            outcomes.push((item.clone(), outcome));
        }
        outcomes
    }

    /// Fetch one item if it is missing or stale
    pub async fn fetch(&self, item: &CacheItem) -> FetchOutcome {
        let dest = self.cache_dir.join(&item.filename);
        let local = match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        };
        let remote = self.remote_size(&item.url).await;

        if !needs_update(local, remote) {
            info!(file = %item.filename, "Up to date in cache");
            return FetchOutcome::UpToDate;
        }
        if let (Some(local), Some(remote)) = (local, remote) {
            info!(file = %item.filename, local, remote, "Size mismatch, updating");
        }

        info!(file = %item.filename, url = %item.url, "Downloading");
        let part = self.cache_dir.join(format!("{}.part", item.filename));
        let outcome = match self.download(&item.url, &part, remote).await {
            Ok(actual) => match remote {
                Some(expected) if expected != actual => {
                    error!(
                        file = %item.filename,
                        expected,
                        actual,
                        "Download incomplete or corrupted"
                    );
                    FetchOutcome::Corrupt { expected, actual }
                }
                _ => match tokio::fs::rename(&part, &dest).await {
                    Ok(()) => {
                        info!(file = %item.filename, bytes = actual, "Download complete");
                        FetchOutcome::Downloaded(actual)
                    }
                    Err(e) => FetchOutcome::Failed(format!("Failed to move file into place: {e}")),
                },
            },
            Err(e) => {
                let message = format!("{e:#}");
                error!(url = %item.url, error = %message, "Download failed");
                FetchOutcome::Failed(message)
            }
        };

        if !outcome.is_ok() {
            if let Err(e) = tokio::fs::remove_file(&part).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %e, "Failed to remove partial file");
                }
            }
        }
        outcome
    }

    /// Remote `Content-Length`, or `None` when unknown or zero
    async fn remote_size(&self, url: &str) -> Option<u64> {
        let response = match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(url, status = %response.status(), "HEAD request rejected");
                return None;
            }
            Err(e) => {
                debug!(url, error = %e, "HEAD request failed");
                return None;
            }
        };
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&len| len > 0)
    }

    /// Stream `url` into `path`, returning the bytes written
    async fn download(&self, url: &str, path: &Path, expected: Option<u64>) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {url}"))?
            .error_for_status()
            .with_context(|| format!("Download of {url} rejected"))?;
        debug!(url, expected = ?expected, "Download started");

        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Download of {url} interrupted"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        Ok(written)
    }
}
