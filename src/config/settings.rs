//! Pipeline Settings - paths, external tools, cloud and server options
//!
//! Every value has a built-in default, so a missing `physioflow.toml`
//! reproduces the stock layout under `ml/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use super::ConfigError;

// ============================================================================
// Top-Level Settings
// ============================================================================

/// Root settings for one PhysioFlow ML workspace.
///
/// Load with `Settings::load()` which searches:
/// 1. `$PHYSIOFLOW_CONFIG` env var
/// 2. `./physioflow.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub frames: FramesConfig,

    #[serde(default)]
    pub pose: PoseConfig,

    #[serde(default)]
    pub trainer: TrainerConfig,

    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Settings {
    /// Load settings using the standard search order, falling back to
    /// defaults when a file is missing or broken.
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(defaults::SETTINGS_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(settings) => {
                        info!(path = %p.display(), "Loaded settings from {}", defaults::SETTINGS_ENV);
                        return settings;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load settings, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::SETTINGS_ENV);
            }
        }

        // 2. Check ./physioflow.toml
        let local = PathBuf::from(defaults::SETTINGS_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(settings) => {
                    info!("Loaded settings from ./{}", defaults::SETTINGS_FILE);
                    return settings;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::SETTINGS_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", defaults::SETTINGS_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse TOML text, logging unknown-key warnings before deserializing.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let settings: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.collector.max_videos == 0 {
            errors.push("collector.max_videos must be > 0".to_string());
        }
        if self.frames.fps == 0 {
            errors.push("frames.fps must be > 0".to_string());
        }
        if self.pose.progress_every == 0 {
            errors.push("pose.progress_every must be > 0".to_string());
        }
        if self.cloud.poll_interval_secs == 0 {
            errors.push("cloud.poll_interval_secs must be > 0".to_string());
        }
        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("server.addr '{}' is not a valid HOST:PORT", self.server.addr));
        }
        match self.server.backend {
            BackendKind::Http if self.server.backend_url.is_empty() => {
                errors.push("server.backend_url is required for the http backend".to_string());
            }
            BackendKind::MistralRs if self.server.model_path.is_empty() => {
                errors.push("server.model_path is required for the mistralrs backend".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Stage hand-off directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_videos_dir")]
    pub videos: PathBuf,
    #[serde(default = "default_frames_dir")]
    pub frames: PathBuf,
    #[serde(default = "default_landmarks_dir")]
    pub landmarks: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models: PathBuf,
    #[serde(default = "default_training_config")]
    pub training_config: PathBuf,
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from(defaults::VIDEOS_DIR)
}
fn default_frames_dir() -> PathBuf {
    PathBuf::from(defaults::FRAMES_DIR)
}
fn default_landmarks_dir() -> PathBuf {
    PathBuf::from(defaults::LANDMARKS_DIR)
}
fn default_models_dir() -> PathBuf {
    PathBuf::from(defaults::MODELS_DIR)
}
fn default_training_config() -> PathBuf {
    PathBuf::from(defaults::TRAINING_CONFIG_PATH)
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            videos: default_videos_dir(),
            frames: default_frames_dir(),
            landmarks: default_landmarks_dir(),
            models: default_models_dir(),
            training_config: default_training_config(),
        }
    }
}

// ============================================================================
// Collector
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_search_term")]
    pub search_term: String,

    #[serde(default = "default_max_videos")]
    pub max_videos: usize,

    /// Preferred clip height in pixels
    #[serde(default = "default_resolution")]
    pub resolution: u32,

    /// Downloader executable
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,

    /// Clips fetched directly when no downloader is installed
    #[serde(default = "default_sample_urls")]
    pub sample_urls: Vec<String>,
}

fn default_search_term() -> String {
    defaults::SEARCH_TERM.to_string()
}
fn default_max_videos() -> usize {
    defaults::MAX_VIDEOS
}
fn default_resolution() -> u32 {
    defaults::VIDEO_RESOLUTION
}
fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}
fn default_sample_urls() -> Vec<String> {
    defaults::SAMPLE_VIDEO_URLS.iter().map(ToString::to_string).collect()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            search_term: default_search_term(),
            max_videos: default_max_videos(),
            resolution: default_resolution(),
            ytdlp_bin: default_ytdlp_bin(),
            sample_urls: default_sample_urls(),
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramesConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    /// Frames extracted per second of video
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
fn default_fps() -> u32 {
    defaults::FRAME_FPS
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            fps: default_fps(),
        }
    }
}

// ============================================================================
// Pose
// ============================================================================

/// External pose estimator invocation.
///
/// The image path is appended as the last argument; the program prints
/// `{"landmarks": [[x, y, z, visibility], ...]}` or `{"landmarks": null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_pose_command")]
    pub command: String,

    #[serde(default = "default_pose_args")]
    pub args: Vec<String>,

    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

fn default_pose_command() -> String {
    "python3".to_string()
}
fn default_pose_args() -> Vec<String> {
    vec!["ml/preprocessing/pose_landmarks.py".to_string()]
}
fn default_progress_every() -> usize {
    defaults::POSE_PROGRESS_EVERY
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            command: default_pose_command(),
            args: default_pose_args(),
            progress_every: default_progress_every(),
        }
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Local trainer invocation; `--job <job.json>` is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_trainer_command")]
    pub command: String,

    #[serde(default = "default_trainer_args")]
    pub args: Vec<String>,
}

fn default_trainer_command() -> String {
    "python3".to_string()
}
fn default_trainer_args() -> Vec<String> {
    vec!["-m".to_string(), "trainer.task".to_string()]
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            command: default_trainer_command(),
            args: default_trainer_args(),
        }
    }
}

// ============================================================================
// Cloud
// ============================================================================

/// Object storage and managed training job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub project_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_executor_image")]
    pub executor_image: String,

    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    #[serde(default = "default_accelerator_type")]
    pub accelerator_type: String,

    #[serde(default = "default_accelerator_count")]
    pub accelerator_count: u32,

    /// Trainer source tree packaged for the managed job
    #[serde(default = "default_trainer_package")]
    pub trainer_package: PathBuf,

    #[serde(default = "default_python_module")]
    pub python_module: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_region() -> String {
    defaults::CLOUD_REGION.to_string()
}
fn default_executor_image() -> String {
    defaults::EXECUTOR_IMAGE.to_string()
}
fn default_machine_type() -> String {
    defaults::MACHINE_TYPE.to_string()
}
fn default_accelerator_type() -> String {
    defaults::ACCELERATOR_TYPE.to_string()
}
fn default_accelerator_count() -> u32 {
    defaults::ACCELERATOR_COUNT
}
fn default_trainer_package() -> PathBuf {
    PathBuf::from("ml/training/trainer")
}
fn default_python_module() -> String {
    defaults::TRAINER_PYTHON_MODULE.to_string()
}
fn default_poll_interval_secs() -> u64 {
    defaults::JOB_POLL_INTERVAL_SECS
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: default_region(),
            bucket: String::new(),
            executor_image: default_executor_image(),
            machine_type: default_machine_type(),
            accelerator_type: default_accelerator_type(),
            accelerator_count: default_accelerator_count(),
            trainer_package: default_trainer_package(),
            python_module: default_python_module(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Which text-generation backend the inference server wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote llama.cpp-compatible `/completion` endpoint
    #[default]
    Http,
    /// In-process GGUF model (requires the `llm` feature)
    MistralRs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// GGUF model file for the in-process backend
    #[serde(default)]
    pub model_path: String,

    /// Base URL of the remote completion server
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}
fn default_backend_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    defaults::GENERATION_TIMEOUT_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            backend: BackendKind::default(),
            model_path: String::new(),
            backend_url: default_backend_url(),
            generation_timeout_secs: default_generation_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
[collector]
max_videos = 3

[cloud]
bucket = "physioflow-data"
"#,
        )
        .unwrap();
        assert_eq!(settings.collector.max_videos, 3);
        assert_eq!(settings.collector.search_term, defaults::SEARCH_TERM);
        assert_eq!(settings.cloud.bucket, "physioflow-data");
        assert_eq!(settings.cloud.region, defaults::CLOUD_REGION);
        assert_eq!(settings.frames.fps, 2);
    }

    #[test]
    fn test_invalid_server_addr_rejected() {
        let result = Settings::from_toml_str("[server]\naddr = \"not-an-addr\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_mistralrs_backend_requires_model_path() {
        let result = Settings::from_toml_str("[server]\nbackend = \"mistralrs\"\n");
        match result {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors[0].contains("model_path"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = Settings::default();
        let text = settings.to_toml().unwrap();
        let parsed = Settings::from_toml_str(&text).unwrap();
        assert_eq!(settings, parsed);
    }
}
