//! Columnar per-video landmark tables
//!
//! One parquet file per clip with three columns:
//!
//! | column        | type                   |
//! |---------------|------------------------|
//! | `frame`       | utf8                   |
//! | `landmarks`   | list<list<float64>>    |
//! | `frame_index` | int64                  |
//!
//! Each inner list is `[x, y, z, visibility]`. Readers cast on load, so tables
//! written with float32 values or large strings are accepted too.

use arrow::array::{Array, ArrayRef, AsArray, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{FrameLandmarks, Landmark};

pub const FRAME_COLUMN: &str = "frame";
pub const LANDMARKS_COLUMN: &str = "landmarks";
pub const FRAME_INDEX_COLUMN: &str = "frame_index";

/// File-name suffix of a landmark table (`<clip>_landmarks.parquet`).
pub const TABLE_SUFFIX: &str = "_landmarks.parquet";

#[derive(Debug, thiserror::Error)]
pub enum LandmarkError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Landmark table is missing column '{0}'")]
    MissingColumn(&'static str),
    #[error("Column '{0}' has an unexpected layout")]
    BadColumn(&'static str),
}

/// Output path of the landmark table for a frame folder.
pub fn table_path(out_dir: &Path, folder_name: &str) -> PathBuf {
    out_dir.join(format!("{folder_name}{TABLE_SUFFIX}"))
}

/// Clip id encoded in a landmark table file name (the stem before `_landmarks`).
pub fn clip_id(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let id = stem.split("_landmarks").next().unwrap_or(stem);
    Some(id.to_string())
}

fn nested_list_type() -> DataType {
    DataType::List(Arc::new(Field::new(
        "item",
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        true,
    )))
}

/// Build the record batch for a set of frames.
pub fn to_record_batch(frames: &[FrameLandmarks]) -> Result<RecordBatch, LandmarkError> {
    let names: StringArray = frames.iter().map(|f| Some(f.frame.as_str())).collect();
    let indices = Int64Array::from(frames.iter().map(|f| f.frame_index).collect::<Vec<i64>>());

    let mut builder = ListBuilder::new(ListBuilder::new(Float64Builder::new()));
    for frame in frames {
        for lm in &frame.landmarks {
            let point = builder.values();
            for v in lm.to_array() {
                point.values().append_value(f64::from(v));
            }
            point.append(true);
        }
        builder.append(true);
    }

    let batch = RecordBatch::try_from_iter(vec![
        (FRAME_COLUMN, Arc::new(names) as ArrayRef),
        (LANDMARKS_COLUMN, Arc::new(builder.finish()) as ArrayRef),
        (FRAME_INDEX_COLUMN, Arc::new(indices) as ArrayRef),
    ])?;
    Ok(batch)
}

/// Write frames to a parquet landmark table.
pub fn write_landmarks(path: &Path, frames: &[FrameLandmarks]) -> Result<(), LandmarkError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LandmarkError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let batch = to_record_batch(frames)?;
    let file = File::create(path).map_err(|source| LandmarkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Read every row of a landmark table, in file order.
pub fn read_landmarks(path: &Path) -> Result<Vec<FrameLandmarks>, LandmarkError> {
    let file = File::open(path).map_err(|source| LandmarkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut frames = Vec::new();
    for batch in reader {
        frames.extend(from_record_batch(&batch?)?);
    }
    Ok(frames)
}

/// Decode one record batch into frames.
pub fn from_record_batch(batch: &RecordBatch) -> Result<Vec<FrameLandmarks>, LandmarkError> {
    let column = |name: &'static str| {
        batch
            .column_by_name(name)
            .ok_or(LandmarkError::MissingColumn(name))
    };

    let names = cast(column(FRAME_COLUMN)?, &DataType::Utf8)?;
    let names = names
        .as_string_opt::<i32>()
        .ok_or(LandmarkError::BadColumn(FRAME_COLUMN))?;

    let indices = cast(column(FRAME_INDEX_COLUMN)?, &DataType::Int64)?;
    let indices = indices
        .as_primitive_opt::<Int64Type>()
        .ok_or(LandmarkError::BadColumn(FRAME_INDEX_COLUMN))?;

    let points = cast(column(LANDMARKS_COLUMN)?, &nested_list_type())?;
    let points = points
        .as_list_opt::<i32>()
        .ok_or(LandmarkError::BadColumn(LANDMARKS_COLUMN))?;

    let mut frames = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut landmarks = Vec::new();
        if points.is_valid(row) {
            let per_frame = points.value(row);
            let per_frame = per_frame
                .as_list_opt::<i32>()
                .ok_or(LandmarkError::BadColumn(LANDMARKS_COLUMN))?;
            for j in 0..per_frame.len() {
                let values = per_frame.value(j);
                let values = values
                    .as_primitive_opt::<Float64Type>()
                    .ok_or(LandmarkError::BadColumn(LANDMARKS_COLUMN))?;
                #[allow(clippy::cast_possible_truncation)]
                let row_values: Vec<f32> = values.values().iter().map(|&v| v as f32).collect();
                landmarks.push(Landmark::from_slice(&row_values));
            }
        }

        frames.push(FrameLandmarks {
            frame: if names.is_valid(row) {
                names.value(row).to_string()
            } else {
                String::new()
            },
            landmarks,
            frame_index: if indices.is_valid(row) {
                indices.value(row)
            } else {
                i64::try_from(row).unwrap_or(i64::MAX)
            },
        });
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, index: i64, n: usize) -> FrameLandmarks {
        #[allow(clippy::cast_precision_loss)]
        let landmarks = (0..n)
            .map(|i| Landmark::new(i as f32 * 0.01, 0.5, -0.25, 0.75))
            .collect();
        FrameLandmarks {
            frame: name.to_string(),
            landmarks,
            frame_index: index,
        }
    }

    #[test]
    fn test_table_roundtrip_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(dir.path(), "video_abc");
        let frames = vec![frame("0001.jpg", 0, 33), frame("0003.jpg", 2, 33)];

        write_landmarks(&path, &frames).unwrap();
        let loaded = read_landmarks(&path).unwrap();

        assert_eq!(loaded, frames);
    }

    #[test]
    fn test_schema_column_order() {
        let batch = to_record_batch(&[frame("0001.jpg", 0, 2)]).unwrap();
        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["frame", "landmarks", "frame_index"]);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let batch = RecordBatch::try_from_iter(vec![(
            FRAME_COLUMN,
            Arc::new(StringArray::from(vec!["0001.jpg"])) as ArrayRef,
        )])
        .unwrap();
        assert!(matches!(
            from_record_batch(&batch),
            Err(LandmarkError::MissingColumn(FRAME_INDEX_COLUMN))
        ));
    }

    #[test]
    fn test_clip_id_from_table_name() {
        assert_eq!(
            clip_id(Path::new("out/video_abc123_landmarks.parquet")).as_deref(),
            Some("video_abc123")
        );
    }
}
