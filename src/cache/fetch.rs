//! Content fetch transport
//!
//! Streams content from its origin into the local cache root. Downloads go
//! to a `.download` temp file and are renamed into place only on success,
//! so an aborted fetch never leaves a half-written file that looks cached.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Retrieves origin content into a local file.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    /// Fetch `origin_url` into `dest`, returning the number of bytes
    /// written. On error no file remains at `dest`.
    async fn fetch(&self, origin_url: &str, dest: &Path) -> Result<u64, TransportError>;
}

/// Deterministic cache-relative path for an origin URL: the URL path with
/// scheme, host, query string, and any leading `/video` prefix removed.
pub fn cache_rel_path(origin_url: &str) -> String {
    let after_scheme = origin_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin_url);
    let path = match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "/",
    };
    let path = path.split('?').next().unwrap_or(path);
    let path = path.strip_prefix("/video").unwrap_or(path);
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// reqwest-backed fetcher with a per-request timeout and a small retry
/// budget, after which the item is abandoned for the current cycle.
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
}

impl HttpFetcher {
    pub fn new(timeout: std::time::Duration, retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, retries }
    }

    async fn try_fetch(&self, origin_url: &str, dest: &Path) -> Result<u64, TransportError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransportError::Io(e.to_string()))?;
        }

        let response = self.client.get(origin_url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let tmp_path = download_path(dest);
        let result = self.stream_to_file(response, &tmp_path).await;
        match result {
            Ok(written) => {
                std::fs::rename(&tmp_path, dest)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                debug!(url = origin_url, bytes = written, "Fetch complete");
                Ok(written)
            }
            Err(e) => {
                // Partial downloads are removed, never left in place.
                std::fs::remove_file(&tmp_path).ok();
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        tmp_path: &Path,
    ) -> Result<u64, TransportError> {
        let mut file =
            std::fs::File::create(tmp_path).map_err(|e| TransportError::Io(e.to_string()))?;
        let mut written: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Network(e.to_string()))?;
            file.write_all(&chunk)
                .map_err(|e| TransportError::Io(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(written)
    }
}

fn download_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".download");
    dest.with_file_name(name)
}

#[async_trait]
impl FetchTransport for HttpFetcher {
    async fn fetch(&self, origin_url: &str, dest: &Path) -> Result<u64, TransportError> {
        let mut last_err = TransportError::Network("no attempts made".to_string());
        for attempt in 0..=self.retries {
            match self.try_fetch(origin_url, dest).await {
                Ok(written) => return Ok(written),
                Err(e) => {
                    warn!(url = origin_url, attempt, error = %e, "Fetch attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
