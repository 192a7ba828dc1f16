//! Local Training Driver
//!
//! Builds the windowed dataset, describes the model and run as JSON, and
//! hands both to a [`Trainer`]. Artifacts of one run share a timestamp:
//!
//! ```text
//! models/
//!   data_<ts>/train.parquet, val.parquet
//!   job_<ts>.json
//!   label_map_<ts>.json
//!   knee_exercise_model_<ts>.h5       (best checkpoint)
//!   knee_exercise_model_<ts>.tflite   (mobile export)
//!   history_<ts>.json                 (optional)
//!   logs/<ts>/
//! ```

mod command;
mod job;
mod model;

pub use command::CommandTrainer;
pub use job::{EarlyStopping, TrainingHistory, TrainingJob};
pub use model::{Activation, Layer, ModelSpec, Optimizer};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{defaults, TrainingConfig};
use crate::dataset::{self, DatasetError};

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Trainer failed: {0}")]
    TrainerFailed(String),
    #[error("Trainer did not produce {0:?}")]
    MissingArtifact(PathBuf),
}

/// Files a finished run left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedArtifacts {
    pub tflite: PathBuf,
    pub checkpoint: Option<PathBuf>,
    pub history: Option<PathBuf>,
}

impl TrainedArtifacts {
    /// Artifacts at the job's paths; optional ones only if present.
    pub fn from_job(job: &TrainingJob) -> Self {
        Self {
            tflite: job.tflite_path.clone(),
            checkpoint: job.checkpoint_path.exists().then(|| job.checkpoint_path.clone()),
            history: job.history_path.exists().then(|| job.history_path.clone()),
        }
    }
}

/// Fits the model described by a job. Implementations block until done.
pub trait Trainer: Send + Sync {
    fn train(&self, job: &TrainingJob, job_file: &Path) -> Result<TrainedArtifacts, TrainingError>;

    fn name(&self) -> &str;
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), TrainingError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|source| TrainingError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn summarize_history(path: &Path) {
    let history = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str::<TrainingHistory>(&s).map_err(|e| e.to_string()));
    match history {
        Ok(history) => match history.best(defaults::MONITOR_METRIC) {
            Some((epoch, value)) => info!(
                epochs = history.epochs(),
                best_epoch = epoch + 1,
                best = value,
                final_loss = ?history.last("loss"),
                "Best {}: {:.4}",
                defaults::MONITOR_METRIC,
                value
            ),
            None => info!(epochs = history.epochs(), "Training history has no validation accuracy"),
        },
        Err(e) => warn!(path = %path.display(), error = %e, "Could not read training history"),
    }
}

/// Run one local training pass and return the exported `.tflite` path.
pub fn train_model(
    config: &TrainingConfig,
    trainer: &dyn Trainer,
    landmarks_dir: &Path,
    videos_dir: &Path,
    output_dir: &Path,
) -> Result<PathBuf, TrainingError> {
    let run_id = chrono::Local::now()
        .format(defaults::RUN_TIMESTAMP_FORMAT)
        .to_string();
    std::fs::create_dir_all(output_dir).map_err(|source| TrainingError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let data = dataset::load_dataset(config, landmarks_dir, videos_dir)?;
    let label_map: BTreeMap<usize, String> = config.classes.iter().cloned().enumerate().collect();

    let split = dataset::export_dataset(
        &data,
        &output_dir.join(format!("data_{run_id}")),
        config.validation_split,
        defaults::SPLIT_SEED,
    )?;

    let job = TrainingJob::new(config, &run_id, split, output_dir, label_map.clone());
    let job_file = output_dir.join(format!("job_{run_id}.json"));
    write_json(&job_file, &job)?;

    let label_map_path = output_dir.join(format!("label_map_{run_id}.json"));
    write_json(&label_map_path, &label_map)?;
    info!(path = %label_map_path.display(), "Label map saved");

    info!(
        trainer = trainer.name(),
        run_id = %run_id,
        epochs = job.epochs,
        batch_size = job.batch_size,
        "Training model"
    );
    let artifacts = trainer.train(&job, &job_file)?;

    if !artifacts.tflite.exists() {
        return Err(TrainingError::MissingArtifact(artifacts.tflite));
    }
    if let Some(history) = &artifacts.history {
        summarize_history(history);
    }

    info!(model = %artifacts.tflite.display(), "TFLite model saved");
    Ok(artifacts.tflite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks;
    use crate::types::{FrameLandmarks, Landmark};

    /// Writes the tflite and a history file, and records the job it saw.
    struct FakeTrainer {
        seen: std::sync::Mutex<Option<TrainingJob>>,
    }

    impl Trainer for FakeTrainer {
        fn train(&self, job: &TrainingJob, job_file: &Path) -> Result<TrainedArtifacts, TrainingError> {
            assert!(job_file.exists());
            std::fs::write(&job.tflite_path, b"tflite").unwrap();
            std::fs::write(&job.history_path, r#"{"val_accuracy": [0.5, 0.8]}"#).unwrap();
            *self.seen.lock().unwrap() = Some(job.clone());
            Ok(TrainedArtifacts::from_job(job))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct NoOutputTrainer;

    impl Trainer for NoOutputTrainer {
        fn train(&self, job: &TrainingJob, _job_file: &Path) -> Result<TrainedArtifacts, TrainingError> {
            Ok(TrainedArtifacts::from_job(job))
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            sequence_length: 4,
            num_landmarks: 2,
            ..TrainingConfig::default()
        }
    }

    fn seed_landmarks(dir: &Path, clips: usize, frames: usize) {
        for c in 0..clips {
            let rows: Vec<FrameLandmarks> = (0..frames)
                .map(|i| FrameLandmarks {
                    frame: format!("{:04}.jpg", i + 1),
                    landmarks: vec![Landmark::new(0.1, 0.2, 0.3, 0.9); 2],
                    frame_index: i64::try_from(i).unwrap(),
                })
                .collect();
            landmarks::write_landmarks(&landmarks::table_path(dir, &format!("video_{c}")), &rows)
                .unwrap();
        }
    }

    #[test]
    fn test_train_model_writes_run_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let lm = root.path().join("landmarks");
        let out = root.path().join("models");
        seed_landmarks(&lm, 2, 12);

        let trainer = FakeTrainer {
            seen: std::sync::Mutex::new(None),
        };
        let tflite = train_model(&small_config(), &trainer, &lm, root.path(), &out).unwrap();

        assert!(tflite.exists());
        let job = trainer.seen.lock().unwrap().clone().unwrap();
        assert!(job.train_data.exists());
        assert!(job.val_data.exists());
        assert_eq!(job.model.input_shape, [4, 8]);

        let label_map: BTreeMap<String, String> = serde_json::from_str(
            &std::fs::read_to_string(out.join(format!("label_map_{}.json", job.run_id))).unwrap(),
        )
        .unwrap();
        assert_eq!(label_map.get("0").map(String::as_str), Some("squat"));
        assert_eq!(label_map.len(), 3);
    }

    #[test]
    fn test_missing_tflite_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let lm = root.path().join("landmarks");
        seed_landmarks(&lm, 1, 12);

        let err = train_model(&small_config(), &NoOutputTrainer, &lm, root.path(), &root.path().join("m"))
            .unwrap_err();
        assert!(matches!(err, TrainingError::MissingArtifact(_)));
    }

    #[test]
    fn test_no_landmarks_is_dataset_error() {
        let root = tempfile::tempdir().unwrap();
        let lm = root.path().join("landmarks");
        std::fs::create_dir(&lm).unwrap();

        let err = train_model(&small_config(), &NoOutputTrainer, &lm, root.path(), root.path())
            .unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(DatasetError::NoTables(_))));
    }
}
