//! Training configuration - the YAML file shared by the local and cloud trainers
//!
//! The file nests everything under a top-level `training:` key:
//!
//! ```yaml
//! training:
//!   epochs: 50
//!   batch_size: 32
//!   learning_rate: 0.001
//!   validation_split: 0.2
//!   sequence_length: 30
//!   num_landmarks: 33
//!   landmark_dims: 4
//!   model:
//!     lstm_units: [128, 64]
//!     dense_units: [32]
//!   classes: [squat, leg_raise, step_up]
//!   metrics: [accuracy, precision, recall, f1]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use super::ConfigError;

/// Wrapper matching the on-disk layout (`training:` root key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrainingFile {
    #[serde(default)]
    training: TrainingConfig,
}

/// Hyperparameters and data shape for the sequence classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Fraction of windows held out for validation
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,

    /// Frames per training window
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,

    /// Keypoints per frame (33 for full-body pose)
    #[serde(default = "default_num_landmarks")]
    pub num_landmarks: usize,

    /// Values per keypoint (x, y, z, visibility)
    #[serde(default = "default_landmark_dims")]
    pub landmark_dims: usize,

    #[serde(default)]
    pub model: ModelConfig,

    /// Class names; a label's index in this list is its class id
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,

    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

/// Layer widths for the recurrent classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Units of the two stacked LSTM layers
    #[serde(default = "default_lstm_units")]
    pub lstm_units: Vec<usize>,

    /// Units of each hidden dense layer, in order
    #[serde(default = "default_dense_units")]
    pub dense_units: Vec<usize>,
}

fn default_epochs() -> u32 {
    50
}
fn default_batch_size() -> u32 {
    32
}
fn default_learning_rate() -> f64 {
    0.001
}
fn default_validation_split() -> f64 {
    0.2
}
fn default_sequence_length() -> usize {
    30
}
fn default_num_landmarks() -> usize {
    33
}
fn default_landmark_dims() -> usize {
    4
}
fn default_lstm_units() -> Vec<usize> {
    vec![128, 64]
}
fn default_dense_units() -> Vec<usize> {
    vec![32]
}
fn default_classes() -> Vec<String> {
    ["squat", "leg_raise", "step_up"]
        .iter()
        .map(ToString::to_string)
        .collect()
}
fn default_metrics() -> Vec<String> {
    ["accuracy", "precision", "recall", "f1"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            lstm_units: default_lstm_units(),
            dense_units: default_dense_units(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            validation_split: default_validation_split(),
            sequence_length: default_sequence_length(),
            num_landmarks: default_num_landmarks(),
            landmark_dims: default_landmark_dims(),
            model: ModelConfig::default(),
            classes: default_classes(),
            metrics: default_metrics(),
        }
    }
}

impl TrainingConfig {
    /// Load and validate a training YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_yaml(&contents)
            .map_err(|e| ConfigError::Yaml(path.to_path_buf(), e))?;
        config.validate()?;
        info!(
            path = %path.display(),
            sequence_length = config.sequence_length,
            classes = config.classes.len(),
            "Loaded training config"
        );
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let file: TrainingFile = serde_yaml::from_str(contents)?;
        Ok(file.training)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&TrainingFile {
            training: self.clone(),
        })
        .map_err(|e| ConfigError::Yaml(PathBuf::new(), e))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
        }
        std::fs::write(path, self.to_yaml()?)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    /// Write the built-in defaults to `path`, creating parent directories.
    pub fn write_default(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "Creating default training config");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Width of one flattened frame.
    pub const fn features_per_frame(&self) -> usize {
        self.num_landmarks * self.landmark_dims
    }

    /// Check every field and report all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.epochs == 0 {
            errors.push("training.epochs must be > 0".to_string());
        }
        if self.batch_size == 0 {
            errors.push("training.batch_size must be > 0".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            errors.push(format!(
                "training.learning_rate = {} must be a positive number",
                self.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            errors.push(format!(
                "training.validation_split = {} must be in [0, 1)",
                self.validation_split
            ));
        }
        // A window shorter than 2 frames has a zero stride.
        if self.sequence_length < 2 {
            errors.push(format!(
                "training.sequence_length = {} must be >= 2",
                self.sequence_length
            ));
        }
        if self.num_landmarks == 0 {
            errors.push("training.num_landmarks must be > 0".to_string());
        }
        if self.landmark_dims == 0 {
            errors.push("training.landmark_dims must be > 0".to_string());
        }
        if self.model.lstm_units.len() != 2 {
            errors.push(format!(
                "training.model.lstm_units must list exactly 2 layers (got {})",
                self.model.lstm_units.len()
            ));
        }
        if self.model.lstm_units.iter().chain(&self.model.dense_units).any(|&u| u == 0) {
            errors.push("training.model layer units must be > 0".to_string());
        }
        if self.classes.is_empty() {
            errors.push("training.classes must not be empty".to_string());
        }
        let unique: HashSet<&String> = self.classes.iter().collect();
        if unique.len() != self.classes.len() {
            errors.push("training.classes contains duplicates".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
