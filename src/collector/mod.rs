//! Video Collector
//!
//! Searches for exercise clips and downloads them into one directory:
//!
//! ```text
//! videos/
//!   video_<id>.mp4
//!   video_<id>_meta.json   { title, duration, views, url, search_term }
//! ```
//!
//! ## Fallback chain
//!
//! 1. Search + per-clip download through a [`VideoSource`]
//! 2. Bulk `yt-dlp ytsearchN:` download (`video_<n>.mp4`, no sidecars)
//! 3. Fixed sample clips fetched over HTTP
//!
//! A single clip failing never aborts the batch; it is logged and counted.

mod samples;
mod ytdlp;

pub use samples::fetch_sample_clips;
pub use ytdlp::YtDlpSource;

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::types::{SearchResult, VideoMetadata};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Search failed: {0}")]
    Search(String),
    #[error("Download of {id} failed: {reason}")]
    Download { id: String, reason: String },
    #[error("'{0}' is not installed or not on PATH")]
    ToolMissing(String),
    #[error("Refusing unsafe video id '{0}'")]
    InvalidId(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A searchable video provider.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Return up to `max_results` hits for `term`.
    async fn search(&self, term: &str, max_results: usize) -> Result<Vec<SearchResult>, CollectError>;

    /// Download one hit to exactly `dest`.
    async fn download(&self, result: &SearchResult, dest: &Path) -> Result<(), CollectError>;

    fn name(&self) -> &'static str;
}

/// Which link of the fallback chain produced the clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectMethod {
    #[default]
    Search,
    BulkDownload,
    SampleClips,
}

/// Outcome of one collection run.
#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    pub method: CollectMethod,
    pub downloaded: Vec<PathBuf>,
    /// Clips already on disk
    pub skipped: Vec<PathBuf>,
    /// `(video id, reason)` for every clip that failed
    pub failed: Vec<(String, String)>,
}

impl CollectReport {
    pub fn total_available(&self) -> usize {
        self.downloaded.len() + self.skipped.len()
    }
}

#[allow(clippy::expect_used)]
fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"))
}

/// Ids become file names, so only URL-safe characters are accepted.
pub fn validate_video_id(id: &str) -> Result<(), CollectError> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(CollectError::InvalidId(id.to_string()))
    }
}

pub fn clip_path(out_dir: &Path, id: &str) -> PathBuf {
    out_dir.join(format!("video_{id}.mp4"))
}

pub fn sidecar_path(out_dir: &Path, id: &str) -> PathBuf {
    out_dir.join(format!("video_{id}_meta.json"))
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<(), CollectError> {
    std::fs::create_dir_all(dir).map_err(|source| CollectError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write the JSON sidecar for a downloaded clip (2-space indent).
pub fn write_sidecar(out_dir: &Path, result: &SearchResult, search_term: &str) -> Result<PathBuf, CollectError> {
    let path = sidecar_path(out_dir, &result.id);
    let meta = VideoMetadata::from_search(result, search_term);
    let json = serde_json::to_string_pretty(&meta)?;
    std::fs::write(&path, json).map_err(|source| CollectError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Search for `search_term` and download each hit into `out_dir`.
///
/// Existing clips are skipped without touching their sidecar. Only a failed
/// search is an error; per-clip failures land in the report.
pub async fn download_videos(
    source: &dyn VideoSource,
    search_term: &str,
    max_results: usize,
    out_dir: &Path,
) -> Result<CollectReport, CollectError> {
    info!(source = source.name(), term = %search_term, "Searching for videos");
    let results = source.search(search_term, max_results).await?;

    ensure_dir(out_dir)?;

    let total = results.len();
    info!("Found {} videos, downloading...", total);

    let mut report = CollectReport::default();
    for (idx, result) in results.iter().enumerate() {
        if let Err(e) = validate_video_id(&result.id) {
            warn!(error = %e, "Skipping search hit");
            report.failed.push((result.id.clone(), e.to_string()));
            continue;
        }

        let target = clip_path(out_dir, &result.id);
        info!("Downloading {}/{}: {}", idx + 1, total, result.title);

        if target.exists() {
            info!(path = %target.display(), "Video already exists, skipping");
            report.skipped.push(target);
            continue;
        }

        let outcome = match source.download(result, &target).await {
            Ok(()) => write_sidecar(out_dir, result, search_term).map(|_| ()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => report.downloaded.push(target),
            Err(e) => {
                warn!(id = %result.id, error = %e, "Failed to download video");
                report.failed.push((result.id.clone(), e.to_string()));
            }
        }
    }

    info!(
        downloaded = report.downloaded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Download pass complete"
    );
    Ok(report)
}

/// Run the full fallback chain.
pub async fn collect_with_fallback(
    source: &dyn VideoSource,
    bulk: &YtDlpSource,
    http: &reqwest::Client,
    sample_urls: &[String],
    search_term: &str,
    max_videos: usize,
    out_dir: &Path,
) -> Result<CollectReport, CollectError> {
    match download_videos(source, search_term, max_videos, out_dir).await {
        Ok(report) => return Ok(report),
        Err(e) => warn!(error = %e, "Error downloading videos, using fallback video downloader"),
    }

    match bulk.bulk_download(search_term, max_videos, out_dir).await {
        Ok(report) => return Ok(report),
        Err(CollectError::ToolMissing(tool)) => {
            warn!(tool = %tool, "Bulk downloader unavailable, downloading sample exercise videos");
        }
        Err(e) => {
            warn!(error = %e, "Bulk download failed, downloading sample exercise videos");
        }
    }

    fetch_sample_clips(http, sample_urls, max_videos, out_dir).await
}
