//! Training job description handed to a [`Trainer`](super::Trainer).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::ModelSpec;
use crate::config::{defaults, TrainingConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub monitor: String,
    pub patience: u32,
    pub restore_best_weights: bool,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self {
            monitor: defaults::MONITOR_METRIC.to_string(),
            patience: defaults::EARLY_STOPPING_PATIENCE,
            restore_best_weights: false,
        }
    }
}

/// Everything a trainer needs for one run. Paths are absolute or relative to
/// the working directory of the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    /// `%Y%m%d_%H%M%S` run stamp shared by every artifact name
    pub run_id: String,
    pub train_data: PathBuf,
    pub val_data: PathBuf,
    pub model: ModelSpec,
    pub epochs: u32,
    pub batch_size: u32,
    pub early_stopping: EarlyStopping,
    /// Best checkpoint by `early_stopping.monitor`
    pub checkpoint_path: PathBuf,
    pub tflite_path: PathBuf,
    pub log_dir: PathBuf,
    /// Per-epoch metric history the trainer may write
    pub history_path: PathBuf,
    pub label_map: BTreeMap<usize, String>,
    /// Extra metrics to report after training
    #[serde(default)]
    pub report_metrics: Vec<String>,
}

impl TrainingJob {
    pub fn new(
        config: &TrainingConfig,
        run_id: &str,
        data: (PathBuf, PathBuf),
        output_dir: &Path,
        label_map: BTreeMap<usize, String>,
    ) -> Self {
        let stem = defaults::MODEL_STEM;
        Self {
            run_id: run_id.to_string(),
            train_data: data.0,
            val_data: data.1,
            model: ModelSpec::from_config(config),
            epochs: config.epochs,
            batch_size: config.batch_size,
            early_stopping: EarlyStopping::default(),
            checkpoint_path: output_dir.join(format!("{stem}_{run_id}.h5")),
            tflite_path: output_dir.join(format!("{stem}_{run_id}.tflite")),
            log_dir: output_dir.join("logs").join(run_id),
            history_path: output_dir.join(format!("history_{run_id}.json")),
            label_map,
            report_metrics: config.metrics.clone(),
        }
    }
}

/// Per-epoch metrics keyed by name (`loss`, `accuracy`, `val_accuracy`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory(pub BTreeMap<String, Vec<f64>>);

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.0.values().map(Vec::len).max().unwrap_or(0)
    }

    /// `(epoch, value)` of the best value of `metric` (highest).
    pub fn best(&self, metric: &str) -> Option<(usize, f64)> {
        self.0
            .get(metric)?
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn last(&self, metric: &str) -> Option<f64> {
        self.0.get(metric)?.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names_share_run_id() {
        let job = TrainingJob::new(
            &TrainingConfig::default(),
            "20240101_120000",
            (PathBuf::from("d/train.parquet"), PathBuf::from("d/val.parquet")),
            Path::new("models"),
            BTreeMap::new(),
        );
        assert_eq!(
            job.checkpoint_path,
            PathBuf::from("models/knee_exercise_model_20240101_120000.h5")
        );
        assert_eq!(
            job.tflite_path,
            PathBuf::from("models/knee_exercise_model_20240101_120000.tflite")
        );
        assert_eq!(job.log_dir, PathBuf::from("models/logs/20240101_120000"));
        assert_eq!(job.early_stopping.patience, 10);
        assert_eq!(job.early_stopping.monitor, "val_accuracy");
        assert!(!job.early_stopping.restore_best_weights);
    }

    #[test]
    fn test_history_best() {
        let history: TrainingHistory =
            serde_json::from_str(r#"{"val_accuracy": [0.4, 0.7, 0.65], "loss": [1.0, 0.5, 0.4]}"#)
                .unwrap();
        assert_eq!(history.epochs(), 3);
        assert_eq!(history.best("val_accuracy"), Some((1, 0.7)));
        assert_eq!(history.last("loss"), Some(0.4));
        assert_eq!(history.best("precision"), None);
    }
}
