//! Frame extraction with an external `ffmpeg`.
//!
//! Every `*.mp4` in the video directory becomes a folder of numbered JPEGs:
//! `frames/<stem>/0001.jpg, 0002.jpg, ...` sampled at a fixed rate.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("ffmpeg ('{0}') is not available")]
    FfmpegMissing(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ffmpeg failed on {video:?}: {stderr}")]
    Ffmpeg { video: PathBuf, stderr: String },
}

/// Whether `bin -version` runs successfully.
pub fn ffmpeg_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// `(frame folder, jpg count)` per extracted video
    pub extracted: Vec<(PathBuf, usize)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// `.mp4` files directly inside `dir`, sorted.
pub fn list_videos(dir: &Path) -> Result<Vec<PathBuf>, FrameError> {
    let entries = std::fs::read_dir(dir).map_err(|source| FrameError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut videos: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "mp4"))
        .collect();
    videos.sort();
    Ok(videos)
}

fn count_jpgs(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "jpg"))
                .count()
        })
        .unwrap_or(0)
}

fn extract_one(ffmpeg: &str, video: &Path, out: &Path, fps: u32) -> Result<usize, FrameError> {
    std::fs::create_dir_all(out).map_err(|source| FrameError::Io {
        path: out.to_path_buf(),
        source,
    })?;

    let output = Command::new(ffmpeg)
        .arg("-i")
        .arg(video)
        .arg("-vf")
        .arg(format!("fps={fps}"))
        .arg(out.join("%04d.jpg"))
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .output()
        .map_err(|source| FrameError::Io {
            path: video.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(FrameError::Ffmpeg {
            video: video.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(count_jpgs(out))
}

/// Extract frames from every video in `video_dir` into `frames_dir/<stem>/`.
///
/// Fails up front if ffmpeg is missing; a video ffmpeg rejects is logged and
/// recorded in the report.
pub fn extract_frames(
    ffmpeg: &str,
    video_dir: &Path,
    frames_dir: &Path,
    fps: u32,
) -> Result<FrameReport, FrameError> {
    if !ffmpeg_available(ffmpeg) {
        return Err(FrameError::FfmpegMissing(ffmpeg.to_string()));
    }

    let videos = list_videos(video_dir)?;
    info!(count = videos.len(), fps, "Extracting frames");

    let mut report = FrameReport::default();
    for video in videos {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let out = frames_dir.join(&stem);

        match extract_one(ffmpeg, &video, &out, fps) {
            Ok(count) => {
                debug!(video = %stem, frames = count, "Frames extracted");
                report.extracted.push((out, count));
            }
            Err(e) => {
                warn!(video = %video.display(), error = %e, "Frame extraction failed");
                report.failed.push((video, e.to_string()));
            }
        }
    }

    info!(
        extracted = report.extracted.len(),
        failed = report.failed.len(),
        "Frame extraction complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ffmpeg_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_frames("no-such-ffmpeg-binary", dir.path(), dir.path(), 2).unwrap_err();
        assert!(matches!(err, FrameError::FfmpegMissing(_)));
    }

    #[test]
    fn test_list_videos_only_mp4_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video_b.mp4", "video_a.mp4", "video_a_meta.json"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let videos = list_videos(dir.path()).unwrap();
        let names: Vec<_> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["video_a.mp4", "video_b.mp4"]);
    }
}
