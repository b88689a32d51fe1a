//! Archive fetcher: downloads the case archive ZIP and unpacks it.
//!
//! The fetch is staged so the archive root only ever holds a complete
//! extraction:
//!
//! 1. leftovers of an interrupted run (`<root>.download.zip`, `<root>.partial`)
//!    are removed; partial work is never resumed;
//! 2. the response body is streamed to `<root>.download.zip`;
//! 3. the ZIP is extracted into `<root>.partial` on a blocking thread;
//! 4. `<root>.partial` is renamed to `<root>`.
//!
//! A response served as HTML (the remote host's interstitial or error page)
//! is rejected before anything is written.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::listing::DOCUMENT_SUFFIX;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download failed with HTTP status {0}")]
    Status(u16),

    #[error("download did not return an archive (content-type: {content_type})")]
    NotAnArchive { content_type: String },

    #[error("archive could not be extracted: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Summary of a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Entries in the ZIP (files and directories).
    pub entries: usize,
    /// Bytes downloaded.
    pub bytes: u64,
    /// Documents found in the extracted tree.
    pub documents: usize,
}

/// Downloads one archive into one root directory.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    url: String,
    root: PathBuf,
}

impl ArchiveFetcher {
    pub fn new(
        url: impl Into<String>,
        root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            root: root.into(),
        })
    }

    pub fn from_config(config: &ArchiveConfig) -> Result<Self, FetchError> {
        Self::new(
            config.resolved_url(),
            config.root.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `true` when the root exists and holds at least one entry.
    pub fn archive_present(&self) -> bool {
        std::fs::read_dir(&self.root)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .root
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("archive"));
        name.push(suffix);
        self.root.with_file_name(name)
    }

    /// Path of the in-flight download.
    pub fn download_path(&self) -> PathBuf {
        self.sibling(".download.zip")
    }

    /// Staging directory for extraction.
    pub fn staging_path(&self) -> PathBuf {
        self.sibling(".partial")
    }

    /// Download and extract, replacing any existing root.
    pub async fn fetch(&self) -> Result<FetchReport, FetchError> {
        let zip_path = self.download_path();
        let staging = self.staging_path();
        self.purge_leftovers(&zip_path, &staging).await?;

        if let Some(parent) = zip_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        info!(url = %self.url, root = %self.root.display(), "downloading archive");
        let bytes = match self.download_to(&zip_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&zip_path).await;
                return Err(e);
            }
        };
        debug!(bytes, path = %zip_path.display(), "archive downloaded");

        let entries = {
            let zip_path = zip_path.clone();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || extract_zip(&zip_path, &staging)).await?
        };
        let entries = match entries {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                let _ = tokio::fs::remove_file(&zip_path).await;
                return Err(e);
            }
        };
        tokio::fs::remove_file(&zip_path)
            .await
            .map_err(io_err(&zip_path))?;

        if tokio::fs::metadata(&self.root).await.is_ok() {
            debug!(root = %self.root.display(), "replacing existing archive root");
            tokio::fs::remove_dir_all(&self.root)
                .await
                .map_err(io_err(&self.root))?;
        }
        tokio::fs::rename(&staging, &self.root)
            .await
            .map_err(io_err(&self.root))?;

        let documents = count_documents(&self.root);
        info!(entries, bytes, documents, "archive extracted");
        Ok(FetchReport {
            entries,
            bytes,
            documents,
        })
    }

    async fn purge_leftovers(&self, zip_path: &Path, staging: &Path) -> Result<(), FetchError> {
        if tokio::fs::metadata(zip_path).await.is_ok() {
            warn!(path = %zip_path.display(), "removing stale download");
            tokio::fs::remove_file(zip_path)
                .await
                .map_err(io_err(zip_path))?;
        }
        if tokio::fs::metadata(staging).await.is_ok() {
            warn!(path = %staging.display(), "removing stale partial extraction");
            tokio::fs::remove_dir_all(staging)
                .await
                .map_err(io_err(staging))?;
        }
        Ok(())
    }

    async fn download_to(&self, path: &Path) -> Result<u64, FetchError> {
        let mut response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/html") {
            return Err(FetchError::NotAnArchive { content_type });
        }

        let mut file = tokio::fs::File::create(path).await.map_err(io_err(path))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(io_err(path))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err(path))?;
        Ok(written)
    }
}

fn extract_zip(zip_path: &Path, staging: &Path) -> Result<usize, FetchError> {
    let file = std::fs::File::open(zip_path).map_err(io_err(zip_path))?;
    let mut archive = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(staging).map_err(io_err(staging))?;
    archive.extract(staging)?;
    Ok(archive.len())
}

fn count_documents(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(DOCUMENT_SUFFIX))
        .count()
}
