//! Pose Landmark Extraction
//!
//! Turns folders of frames into per-clip landmark tables:
//!
//! ```text
//! frames/video_<id>/0001.jpg ...  →  landmarks/video_<id>_landmarks.parquet
//! ```
//!
//! The estimator itself is a black box behind [`PoseEstimator`]. Folders are
//! independent, so [`process_all_videos`] fans out across them with rayon.

mod command;
mod video_intelligence;

pub use command::CommandPoseEstimator;
pub use video_intelligence::{clip_name, VideoIntelligenceClient};

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::landmarks::{self, LandmarkError};
use crate::types::{FrameLandmarks, Landmark};

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Pose estimator failed on {image:?}: {reason}")]
    Estimator { image: PathBuf, reason: String },
    #[error("Landmark table error: {0}")]
    Table(#[from] LandmarkError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Video annotation failed: {0}")]
    Annotation(String),
    #[error("Video annotation wait cancelled")]
    Cancelled,
}

/// Single-image pose estimator.
pub trait PoseEstimator: Send + Sync {
    /// Landmarks of the most prominent person, or `None` when nobody is found.
    fn estimate(&self, image: &Path) -> Result<Option<Vec<Landmark>>, PoseError>;

    fn name(&self) -> &str;
}

/// What happened to one frame folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    Written { table: PathBuf, frames: usize },
    /// Table already existed
    Skipped(PathBuf),
    NoDetections,
}

/// Sorted `*.jpg` files in a folder.
pub fn list_frames(folder: &Path) -> Result<Vec<PathBuf>, PoseError> {
    let entries = std::fs::read_dir(folder).map_err(|source| PoseError::Io {
        path: folder.to_path_buf(),
        source,
    })?;
    let mut frames: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
        .collect();
    frames.sort();
    Ok(frames)
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 1-based progress message for frame `i` of `total`.
fn progress_line(i: usize, total: usize) -> String {
    format!("Processing frame {}/{}", i + 1, total)
}

/// Extract landmarks for every frame of one folder into
/// `out_dir/<folder>_landmarks.parquet`.
///
/// `frame_index` is the position in the sorted listing, so gaps left by
/// undetected frames are preserved. Unreadable images are skipped.
pub fn process_frames(
    estimator: &dyn PoseEstimator,
    folder: &Path,
    out_dir: &Path,
    progress_every: usize,
) -> Result<FolderOutcome, PoseError> {
    let name = folder_name(folder);
    let table = landmarks::table_path(out_dir, &name);
    if table.exists() {
        info!(table = %table.display(), "Landmarks already exist, skipping");
        return Ok(FolderOutcome::Skipped(table));
    }

    let frames = list_frames(folder)?;
    let total = frames.len();
    let every = progress_every.max(1);
    let mut rows = Vec::new();

    for (i, frame) in frames.iter().enumerate() {
        if i % every == 0 {
            info!(folder = %name, "{}", progress_line(i, total));
        }

        if let Err(e) = image::image_dimensions(frame) {
            warn!(frame = %frame.display(), error = %e, "Could not read image");
            continue;
        }

        let detected = match estimator.estimate(frame) {
            Ok(detected) => detected,
            Err(e) => {
                warn!(frame = %frame.display(), error = %e, "Pose estimation failed");
                continue;
            }
        };

        if let Some(points) = detected {
            rows.push(FrameLandmarks {
                frame: frame
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                landmarks: points,
                frame_index: i64::try_from(i).unwrap_or(i64::MAX),
            });
        }
    }

    if rows.is_empty() {
        warn!(folder = %name, "No landmarks detected");
        return Ok(FolderOutcome::NoDetections);
    }

    landmarks::write_landmarks(&table, &rows)?;
    info!(table = %table.display(), frames = rows.len(), "Saved landmarks");
    Ok(FolderOutcome::Written {
        table,
        frames: rows.len(),
    })
}

/// Process every subdirectory of `input_dir` in parallel.
///
/// Returns one `(folder, outcome)` per folder; a folder that fails is logged
/// and reported without stopping the others.
pub fn process_all_videos(
    estimator: &dyn PoseEstimator,
    input_dir: &Path,
    out_dir: &Path,
    progress_every: usize,
) -> Result<Vec<(PathBuf, Result<FolderOutcome, PoseError>)>, PoseError> {
    std::fs::create_dir_all(out_dir).map_err(|source| PoseError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let entries = std::fs::read_dir(input_dir).map_err(|source| PoseError::Io {
        path: input_dir.to_path_buf(),
        source,
    })?;
    let mut folders: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();

    info!(
        estimator = estimator.name(),
        folders = folders.len(),
        "Extracting pose landmarks"
    );

    let results: Vec<_> = folders
        .into_par_iter()
        .map(|folder| {
            let outcome = process_frames(estimator, &folder, out_dir, progress_every);
            match &outcome {
                Ok(o) => debug!(folder = %folder.display(), outcome = ?o, "Folder done"),
                Err(e) => warn!(folder = %folder.display(), error = %e, "Folder failed"),
            }
            (folder, outcome)
        })
        .collect();

    Ok(results)
}
