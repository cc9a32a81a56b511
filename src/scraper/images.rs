//! Image download contract invoked on upsert.
//!
//! Download failures are non-fatal by design of the callers: workers record
//! the outcome in the record's image-status column and continue.

use crate::error::{Result, ScrapeError};
use std::path::PathBuf;

#[async_trait::async_trait]
pub trait ImageStore: Send + Sync {
    /// Download `url` and store it under `key`. Errors only as
    /// [`ScrapeError::ImageDownload`].
    async fn download(&self, url: &str, key: &str) -> Result<()>;
}

/// Filesystem-backed image store.
pub struct FsImageStore {
    client: reqwest::Client,
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            dir: dir.into(),
        })
    }
}

#[async_trait::async_trait]
impl ImageStore for FsImageStore {
    async fn download(&self, url: &str, key: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::ImageDownload(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ScrapeError::ImageDownload(format!(
                "{url}: HTTP {}",
                response.status().as_u16()
            )));
        }

        let extension = url.rsplit('.').next().filter(|e| e.len() <= 4).unwrap_or("jpg");
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScrapeError::ImageDownload(format!("{url}: {e}")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ScrapeError::ImageDownload(format!("create {:?}: {e}", self.dir)))?;
        let path = self.dir.join(format!("{key}.{extension}"));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ScrapeError::ImageDownload(format!("write {path:?}: {e}")))?;

        Ok(())
    }
}
