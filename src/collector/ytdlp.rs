//! `yt-dlp` driven video source.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ensure_dir, CollectError, CollectMethod, CollectReport, VideoSource};
use crate::types::SearchResult;

/// One line of `yt-dlp --dump-json --flat-playlist` output.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    view_count: Option<u64>,
}

impl FlatEntry {
    fn into_result(self) -> SearchResult {
        SearchResult {
            title: self.title.unwrap_or_else(|| self.id.clone()),
            duration: self.duration.map(format_duration).unwrap_or_default(),
            views: self.view_count.map(|v| v.to_string()).unwrap_or_default(),
            id: self.id,
        }
    }
}

/// `83.0` → `1:23`, `3723.0` → `1:02:03`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Parse newline-delimited search output, ignoring blank lines.
fn parse_search_output(stdout: &str) -> Result<Vec<SearchResult>, CollectError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<FlatEntry>(line)
                .map(FlatEntry::into_result)
                .map_err(CollectError::from)
        })
        .collect()
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.lines().last().unwrap_or("").trim().to_string()
}

#[derive(Debug, Clone)]
pub struct YtDlpSource {
    bin: String,
    resolution: u32,
}

impl YtDlpSource {
    pub fn new(bin: impl Into<String>, resolution: u32) -> Self {
        Self {
            bin: bin.into(),
            resolution,
        }
    }

    /// Format selector: mp4 at or below the configured height, then any mp4.
    pub fn format_selector(&self) -> String {
        format!(
            "best[height<={r}][ext=mp4]/best[ext=mp4]/best",
            r = self.resolution
        )
    }

    async fn run(&self, args: &[String]) -> Result<Output, CollectError> {
        debug!(bin = %self.bin, ?args, "Running downloader");
        Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CollectError::ToolMissing(self.bin.clone()),
                _ => CollectError::Io {
                    path: PathBuf::from(&self.bin),
                    source: e,
                },
            })
    }

    /// Download the first `max_videos` search hits in one call, named
    /// `video_<n>.mp4` by playlist position. No sidecars are written.
    pub async fn bulk_download(
        &self,
        search_term: &str,
        max_videos: usize,
        out_dir: &Path,
    ) -> Result<CollectReport, CollectError> {
        ensure_dir(out_dir)?;
        let existing = list_mp4s(out_dir)?;
        let template = out_dir.join("video_%(playlist_index)s.%(ext)s");
        let args = vec![
            format!("ytsearch{max_videos}:{search_term}"),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            "--max-downloads".to_string(),
            max_videos.to_string(),
            "--format".to_string(),
            "mp4".to_string(),
        ];

        let output = self.run(&args).await?;
        // --max-downloads exits with 101 once the limit is hit
        if !output.status.success() && output.status.code() != Some(101) {
            return Err(CollectError::Search(stderr_tail(&output)));
        }

        let (skipped, downloaded): (Vec<PathBuf>, Vec<PathBuf>) = list_mp4s(out_dir)?
            .into_iter()
            .partition(|p| existing.contains(p));

        info!(
            downloaded = downloaded.len(),
            skipped = skipped.len(),
            "Bulk download complete"
        );
        Ok(CollectReport {
            method: CollectMethod::BulkDownload,
            downloaded,
            skipped,
            ..CollectReport::default()
        })
    }
}

/// `*.mp4` files directly under `dir`.
fn list_mp4s(dir: &Path) -> Result<BTreeSet<PathBuf>, CollectError> {
    Ok(std::fs::read_dir(dir)
        .map_err(|source| CollectError::Io {
            path: dir.to_path_buf(),
            source,
        })?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "mp4"))
        .collect())
}

#[async_trait]
impl VideoSource for YtDlpSource {
    async fn search(&self, term: &str, max_results: usize) -> Result<Vec<SearchResult>, CollectError> {
        let args = vec![
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            format!("ytsearch{max_results}:{term}"),
        ];
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(CollectError::Search(stderr_tail(&output)));
        }
        let mut results = parse_search_output(&String::from_utf8_lossy(&output.stdout))?;
        results.truncate(max_results);
        Ok(results)
    }

    async fn download(&self, result: &SearchResult, dest: &Path) -> Result<(), CollectError> {
        let args = vec![
            "--no-playlist".to_string(),
            "--format".to_string(),
            self.format_selector(),
            "--output".to_string(),
            dest.to_string_lossy().into_owned(),
            result.watch_url(),
        ];
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(CollectError::Download {
                id: result.id.clone(),
                reason: stderr_tail(&output),
            });
        }
        if !dest.exists() {
            return Err(CollectError::Download {
                id: result.id.clone(),
                reason: "downloader exited without producing a file".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_output() {
        let stdout = r#"{"id": "abc123", "title": "Knee squat", "duration": 83.0, "view_count": 1500}

{"id": "def456", "title": null}
"#;
        let results = parse_search_output(stdout).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].duration, "1:23");
        assert_eq!(results[0].views, "1500");
        assert_eq!(results[1].title, "def456");
        assert_eq!(results[1].duration, "");
    }

    #[test]
    fn test_format_duration_hours() {
        assert_eq!(format_duration(3723.0), "1:02:03");
        assert_eq!(format_duration(5.0), "0:05");
    }

    #[test]
    fn test_format_selector_uses_resolution() {
        let source = YtDlpSource::new("yt-dlp", 360);
        assert!(source.format_selector().starts_with("best[height<=360][ext=mp4]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bulk_download_reports_only_new_files() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("videos");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("video_old.mp4"), b"old").unwrap();

        // $3 is the --output template
        let bin = root.path().join("yt-dlp");
        std::fs::write(&bin, "#!/bin/sh\ntouch \"$(dirname \"$3\")/video_1.mp4\"\nexit 101\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = YtDlpSource::new(bin.to_string_lossy(), 360);
        let report = source.bulk_download("knee exercise", 1, &out).await.unwrap();

        assert_eq!(report.method, CollectMethod::BulkDownload);
        assert_eq!(report.downloaded, vec![out.join("video_1.mp4")]);
        assert_eq!(report.skipped, vec![out.join("video_old.mp4")]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_missing() {
        let source = YtDlpSource::new("definitely-not-a-real-downloader-bin", 360);
        let err = source.search("knee", 1).await.unwrap_err();
        assert!(matches!(err, CollectError::ToolMissing(_)));
    }
}
