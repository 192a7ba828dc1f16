//! Training dataset construction
//!
//! Turns per-clip landmark tables into fixed-length, 50%-overlapping windows
//! of flattened frames, each labelled from its clip's title:
//!
//! ```text
//! frames (sorted by frame_index) ──► [f0 f1 … f29] [f15 … f44] [f30 … f59] …
//!                                      window 0      window 1     window 2
//! ```
//!
//! A clip shorter than `sequence_length` frames contributes no windows.

use arrow::array::{ArrayRef, Float32Builder, Int64Array, ListBuilder, StringArray};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{defaults, TrainingConfig};
use crate::landmarks::{self, LandmarkError};
use crate::types::ExerciseClass;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("No parquet files found in {0:?}")]
    NoTables(PathBuf),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Landmarks(#[from] LandmarkError),
    #[error("Clip {clip}: frame has {found} values, expected {expected}")]
    ShapeMismatch {
        clip: String,
        expected: usize,
        found: usize,
    },
    #[error("No training windows could be built from {0:?}")]
    Empty(PathBuf),
    #[error("{samples} windows are too few for a validation split of {split}")]
    TooFewSamples { samples: usize, split: f64 },
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

// ============================================================================
// Labelling
// ============================================================================

/// Assign an exercise class from a clip title.
///
/// Case-insensitive substring match, checked in order: `squat`, then
/// `leg raise` / `straight leg`, then `step up` / `step-up`. Anything else
/// is a squat.
pub fn classify_title(title: &str) -> ExerciseClass {
    let title = title.to_lowercase();
    if title.contains("squat") {
        ExerciseClass::Squat
    } else if title.contains("leg raise") || title.contains("straight leg") {
        ExerciseClass::LegRaise
    } else if title.contains("step up") || title.contains("step-up") {
        ExerciseClass::StepUp
    } else {
        ExerciseClass::default()
    }
}

#[derive(Deserialize)]
struct TitleOnly {
    title: String,
}

/// Sidecar file names tried for a clip, in order.
///
/// Landmark tables are named after the frame folder (`video_<id>`), while the
/// collector writes `video_<id>_meta.json`; bare ids are accepted too.
fn sidecar_candidates(clip_id: &str, videos_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![videos_dir.join(format!("{clip_id}_meta.json"))];
    if !clip_id.starts_with("video_") {
        candidates.push(videos_dir.join(format!("video_{clip_id}_meta.json")));
    }
    candidates
}

/// Class of a clip from its metadata sidecar; squat when none is found.
pub fn label_for_video(clip_id: &str, videos_dir: &Path) -> ExerciseClass {
    for path in sidecar_candidates(clip_id, videos_dir) {
        if !path.exists() {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<TitleOnly>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(meta) => return classify_title(&meta.title),
            Err(e) => warn!(path = %path.display(), error = %e, "Unreadable metadata sidecar"),
        }
    }
    ExerciseClass::default()
}

// ============================================================================
// Windowing
// ============================================================================

/// Distance between consecutive window starts (half a window, at least 1).
pub const fn window_stride(sequence_length: usize) -> usize {
    let stride = sequence_length / defaults::WINDOW_OVERLAP_DIVISOR;
    if stride == 0 {
        1
    } else {
        stride
    }
}

/// Every full window of `sequence_length` consecutive items.
///
/// Starts at 0 and advances by [`window_stride`]; a trailing partial window
/// is dropped.
pub fn sliding_windows<T>(items: &[T], sequence_length: usize) -> Vec<&[T]> {
    if sequence_length == 0 || items.len() < sequence_length {
        return Vec::new();
    }
    (0..=items.len() - sequence_length)
        .step_by(window_stride(sequence_length))
        .map(|start| &items[start..start + sequence_length])
        .collect()
}

// ============================================================================
// Dataset
// ============================================================================

/// Labelled windows ready for the trainer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub sequence_length: usize,
    pub features_per_frame: usize,
    /// One entry per window, `sequence_length * features_per_frame` values, row-major
    pub sequences: Vec<Vec<f32>>,
    pub labels: Vec<String>,
    /// Index of each label in `classes`
    pub label_indices: Vec<usize>,
    pub classes: Vec<String>,
}

impl Dataset {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            sequence_length: config.sequence_length,
            features_per_frame: config.features_per_frame(),
            classes: config.classes.clone(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// `(windows, sequence_length, features_per_frame)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.len(), self.sequence_length, self.features_per_frame)
    }

    /// Append one window. Unknown labels are encoded as class 0.
    pub fn push(&mut self, sequence: Vec<f32>, label: &str) {
        let index = self.classes.iter().position(|c| c == label).unwrap_or(0);
        self.sequences.push(sequence);
        self.labels.push(label.to_string());
        self.label_indices.push(index);
    }

    /// Add every window of one clip's flattened frames.
    pub fn extend_from_frames(&mut self, frames: &[Vec<f32>], label: &str) -> usize {
        let windows = sliding_windows(frames, self.sequence_length);
        let count = windows.len();
        for window in windows {
            self.push(window.concat(), label);
        }
        count
    }

    /// One-hot targets, one row per window.
    pub fn one_hot(&self) -> Vec<Vec<f32>> {
        let n_classes = self.classes.len().max(1);
        self.label_indices
            .iter()
            .map(|&i| {
                let mut row = vec![0.0; n_classes];
                row[i.min(n_classes - 1)] = 1.0;
                row
            })
            .collect()
    }

    /// Class id → class name, as written to `label_map_<ts>.json`.
    pub fn label_map(&self) -> BTreeMap<usize, String> {
        self.classes.iter().cloned().enumerate().collect()
    }

    /// Windows per class name.
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            sequence_length: self.sequence_length,
            features_per_frame: self.features_per_frame,
            sequences: indices.iter().map(|&i| self.sequences[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i].clone()).collect(),
            label_indices: indices.iter().map(|&i| self.label_indices[i]).collect(),
            classes: self.classes.clone(),
        }
    }

    /// Shuffle with a fixed seed and hold out `ceil(n * validation_split)` windows.
    ///
    /// Returns `(train, validation)`.
    pub fn split(&self, validation_split: f64, seed: u64) -> Result<(Self, Self), DatasetError> {
        let n = self.len();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let n_val = (n as f64 * validation_split).ceil() as usize;
        if n == 0 || n_val >= n {
            return Err(DatasetError::TooFewSamples {
                samples: n,
                split: validation_split,
            });
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (val, train) = order.split_at(n_val);
        Ok((self.subset(train), self.subset(val)))
    }

    /// Write windows as a parquet table (`label`, `label_index`, `features`).
    pub fn write_parquet(&self, path: &Path) -> Result<(), DatasetError> {
        let labels = StringArray::from(self.labels.clone());
        let indices = Int64Array::from(
            self.label_indices
                .iter()
                .map(|&i| i64::try_from(i).unwrap_or(i64::MAX))
                .collect::<Vec<i64>>(),
        );
        let mut features = ListBuilder::new(Float32Builder::new());
        for sequence in &self.sequences {
            features.values().append_slice(sequence);
            features.append(true);
        }

        let batch = RecordBatch::try_from_iter(vec![
            ("label", Arc::new(labels) as ArrayRef),
            ("label_index", Arc::new(indices) as ArrayRef),
            ("features", Arc::new(features.finish()) as ArrayRef),
        ])?;

        let file = File::create(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Parquet tables in a directory, sorted by name.
pub fn list_tables(landmarks_dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = std::fs::read_dir(landmarks_dir).map_err(|source| DatasetError::Io {
        path: landmarks_dir.to_path_buf(),
        source,
    })?;
    let mut tables: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "parquet"))
        .collect();
    tables.sort();
    Ok(tables)
}

/// Flatten one clip's frames in `frame_index` order, checking frame width.
fn flatten_clip(
    clip: &str,
    mut frames: Vec<crate::types::FrameLandmarks>,
    width: usize,
) -> Result<Vec<Vec<f32>>, DatasetError> {
    frames.sort_by_key(|f| f.frame_index);
    frames
        .iter()
        .map(|f| {
            let flat = f.flatten();
            if flat.len() == width {
                Ok(flat)
            } else {
                Err(DatasetError::ShapeMismatch {
                    clip: clip.to_string(),
                    expected: width,
                    found: flat.len(),
                })
            }
        })
        .collect()
}

/// Build the full dataset from every landmark table in `landmarks_dir`.
///
/// Labels come from sidecars in `videos_dir`. A table that cannot be read or
/// has the wrong frame width is logged and skipped.
pub fn load_dataset(
    config: &TrainingConfig,
    landmarks_dir: &Path,
    videos_dir: &Path,
) -> Result<Dataset, DatasetError> {
    info!(dir = %landmarks_dir.display(), "Loading landmark data");

    let tables = list_tables(landmarks_dir)?;
    if tables.is_empty() {
        return Err(DatasetError::NoTables(landmarks_dir.to_path_buf()));
    }

    let mut dataset = Dataset::new(config);
    for table in &tables {
        let clip = landmarks::clip_id(table).unwrap_or_default();
        let label = label_for_video(&clip, videos_dir);

        let frames = match landmarks::read_landmarks(table) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(table = %table.display(), error = %e, "Skipping unreadable landmark table");
                continue;
            }
        };

        let flat = match flatten_clip(&clip, frames, dataset.features_per_frame) {
            Ok(flat) => flat,
            Err(e) => {
                warn!(table = %table.display(), error = %e, "Skipping clip");
                continue;
            }
        };

        let added = dataset.extend_from_frames(&flat, label.as_str());
        debug!(clip = %clip, label = %label, frames = flat.len(), windows = added, "Clip windowed");
    }

    if dataset.is_empty() {
        return Err(DatasetError::Empty(landmarks_dir.to_path_buf()));
    }

    let (n, seq, width) = dataset.shape();
    info!(
        sequences = n,
        sequence_length = seq,
        features = width,
        classes = ?dataset.class_counts(),
        "Loaded {} sequences with shape ({}, {}, {})",
        n, n, seq, width
    );
    Ok(dataset)
}

/// Split and write `train.parquet` / `val.parquet` into `dir`.
///
/// Returns the two paths in that order.
pub fn export_dataset(
    dataset: &Dataset,
    dir: &Path,
    validation_split: f64,
    seed: u64,
) -> Result<(PathBuf, PathBuf), DatasetError> {
    std::fs::create_dir_all(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let (train, val) = dataset.split(validation_split, seed)?;

    let train_path = dir.join("train.parquet");
    let val_path = dir.join("val.parquet");
    train.write_parquet(&train_path)?;
    val.write_parquet(&val_path)?;

    info!(train = train.len(), val = val.len(), dir = %dir.display(), "Dataset exported");
    Ok((train_path, val_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_title_keywords() {
        assert_eq!(classify_title("Perfect SQUAT form"), ExerciseClass::Squat);
        assert_eq!(classify_title("Straight Leg exercise"), ExerciseClass::LegRaise);
        assert_eq!(classify_title("Side leg raise for knees"), ExerciseClass::LegRaise);
        assert_eq!(classify_title("Step-Up progression"), ExerciseClass::StepUp);
        assert_eq!(classify_title("step up drills"), ExerciseClass::StepUp);
    }

    #[test]
    fn test_classify_title_squat_takes_precedence() {
        assert_eq!(classify_title("Step up into a squat"), ExerciseClass::Squat);
    }

    #[test]
    fn test_classify_title_default() {
        assert_eq!(classify_title("Knee rehab day 3"), ExerciseClass::Squat);
        assert_eq!(classify_title(""), ExerciseClass::Squat);
    }

    #[test]
    fn test_window_stride_is_half() {
        assert_eq!(window_stride(30), 15);
        assert_eq!(window_stride(5), 2);
        assert_eq!(window_stride(1), 1);
    }

    #[test]
    fn test_sliding_windows_fixed_length_and_overlap() {
        let frames: Vec<usize> = (0..100).collect();
        let windows = sliding_windows(&frames, 30);

        // starts 0, 15, 30, 45, 60 (75 would end at 105)
        assert_eq!(windows.len(), 5);
        for (k, w) in windows.iter().enumerate() {
            assert_eq!(w.len(), 30);
            assert_eq!(w[0], k * 15);
        }
    }

    #[test]
    fn test_sliding_windows_count_formula() {
        for n in 0..80 {
            let frames: Vec<usize> = (0..n).collect();
            let expected = if n < 10 { 0 } else { (n - 10) / 5 + 1 };
            assert_eq!(sliding_windows(&frames, 10).len(), expected, "n = {n}");
        }
    }

    #[test]
    fn test_sliding_windows_short_clip_is_empty() {
        let frames = [1, 2, 3];
        assert!(sliding_windows(&frames, 4).is_empty());
        assert_eq!(sliding_windows(&frames, 3).len(), 1);
    }

    fn tiny_config() -> TrainingConfig {
        TrainingConfig {
            sequence_length: 4,
            num_landmarks: 1,
            landmark_dims: 2,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_extend_concatenates_frames() {
        let mut dataset = Dataset::new(&tiny_config());
        let frames: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32, -(i as f32)]).collect();

        let added = dataset.extend_from_frames(&frames, "step_up");

        assert_eq!(added, 2);
        assert_eq!(dataset.shape(), (2, 4, 2));
        assert_eq!(dataset.sequences[1][..2], [2.0, -2.0]);
        assert_eq!(dataset.label_indices, vec![2, 2]);
    }

    #[test]
    fn test_unknown_label_maps_to_first_class() {
        let mut dataset = Dataset::new(&tiny_config());
        dataset.push(vec![0.0; 8], "lunge");
        assert_eq!(dataset.label_indices, vec![0]);
        assert_eq!(dataset.one_hot(), vec![vec![1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_split_is_deterministic_and_sized() {
        let mut dataset = Dataset::new(&tiny_config());
        for i in 0..10 {
            dataset.push(vec![i as f32; 8], "squat");
        }

        let (train_a, val_a) = dataset.split(0.2, 42).unwrap();
        let (train_b, val_b) = dataset.split(0.2, 42).unwrap();

        assert_eq!(val_a.len(), 2);
        assert_eq!(train_a.len(), 8);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
    }

    #[test]
    fn test_split_rejects_empty_train_side() {
        let mut dataset = Dataset::new(&tiny_config());
        dataset.push(vec![0.0; 8], "squat");
        assert!(matches!(
            dataset.split(0.2, 42),
            Err(DatasetError::TooFewSamples { samples: 1, .. })
        ));
    }

    #[test]
    fn test_label_for_video_reads_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("video_abc_meta.json"),
            r#"{"title": "Straight leg raise", "url": "u", "search_term": "s"}"#,
        )
        .unwrap();

        assert_eq!(label_for_video("video_abc", dir.path()), ExerciseClass::LegRaise);
        assert_eq!(label_for_video("abc", dir.path()), ExerciseClass::LegRaise);
        assert_eq!(label_for_video("video_missing", dir.path()), ExerciseClass::Squat);
    }

    fn one_point_config() -> TrainingConfig {
        TrainingConfig {
            sequence_length: 2,
            num_landmarks: 1,
            landmark_dims: 4,
            ..TrainingConfig::default()
        }
    }

    /// Frames whose single landmark has `x == frame_index`.
    fn clip_frames(indices: &[i64], points: usize) -> Vec<crate::types::FrameLandmarks> {
        indices
            .iter()
            .map(|&i| crate::types::FrameLandmarks {
                frame: format!("{i:04}.jpg"),
                landmarks: vec![crate::types::Landmark::new(i as f32, 0.0, 0.0, 1.0); points],
                frame_index: i,
            })
            .collect()
    }

    #[test]
    fn test_load_dataset_sorts_frames_and_skips_wrong_width() {
        let root = tempfile::tempdir().unwrap();
        let (landmarks_dir, videos_dir) = (root.path().join("landmarks"), root.path().join("videos"));
        std::fs::create_dir_all(&landmarks_dir).unwrap();
        std::fs::create_dir_all(&videos_dir).unwrap();

        landmarks::write_landmarks(
            &landmarks::table_path(&landmarks_dir, "video_abc"),
            &clip_frames(&[3, 0, 2, 1], 1),
        )
        .unwrap();
        landmarks::write_landmarks(
            &landmarks::table_path(&landmarks_dir, "video_wide"),
            &clip_frames(&[0, 1, 2, 3], 2),
        )
        .unwrap();
        std::fs::write(
            videos_dir.join("video_abc_meta.json"),
            r#"{"title": "Step-up for weak knees", "url": "u", "search_term": "s"}"#,
        )
        .unwrap();

        let dataset = load_dataset(&one_point_config(), &landmarks_dir, &videos_dir).unwrap();

        assert_eq!(dataset.shape(), (3, 2, 4));
        assert_eq!(dataset.labels, vec!["step_up"; 3]);
        assert_eq!(dataset.label_indices, vec![2; 3]);
        assert_eq!(dataset.sequences[0], vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        assert_eq!(dataset.sequences[2][..4], [2.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_load_dataset_defaults_to_squat_without_sidecar() {
        let root = tempfile::tempdir().unwrap();
        landmarks::write_landmarks(&landmarks::table_path(root.path(), "video_x"), &clip_frames(&[0, 1], 1)).unwrap();

        let dataset = load_dataset(&one_point_config(), root.path(), root.path()).unwrap();
        assert_eq!(dataset.labels, vec!["squat"]);
    }

    #[test]
    fn test_load_dataset_errors() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_dataset(&one_point_config(), root.path(), root.path()),
            Err(DatasetError::NoTables(_))
        ));

        landmarks::write_landmarks(&landmarks::table_path(root.path(), "video_wide"), &clip_frames(&[0, 1, 2], 2))
            .unwrap();
        assert!(matches!(
            load_dataset(&one_point_config(), root.path(), root.path()),
            Err(DatasetError::Empty(_))
        ));
    }

    #[test]
    fn test_export_dataset_writes_both_splits() {
        let mut dataset = Dataset::new(&tiny_config());
        for i in 0..5 {
            dataset.push(vec![i as f32; 8], "leg_raise");
        }
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dataset");

        let (train, val) = export_dataset(&dataset, &out, 0.2, 42).unwrap();

        assert_eq!(train, out.join("train.parquet"));
        assert_eq!(val, out.join("val.parquet"));
        assert!(train.is_file() && val.is_file());
    }
}
