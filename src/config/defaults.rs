//! System-wide default constants.
//!
//! Centralises the magic numbers used by the pipeline stages.
//! Grouped by stage for easy discovery.

// ============================================================================
// Paths
// ============================================================================

/// Downloaded clips and their JSON sidecars.
pub const VIDEOS_DIR: &str = "ml/data/videos";

/// One sub-directory of extracted JPEG frames per clip.
pub const FRAMES_DIR: &str = "ml/data/frames";

/// One `<clip>_landmarks.parquet` table per clip.
pub const LANDMARKS_DIR: &str = "ml/data/landmarks";

/// Trained artifacts (checkpoint, mobile model, label map).
pub const MODELS_DIR: &str = "ml/models";

/// Training configuration consumed by the local and cloud trainers.
pub const TRAINING_CONFIG_PATH: &str = "ml/training/config.yaml";

/// Pipeline settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = "physioflow.toml";

/// Environment variable pointing at an alternate settings file.
pub const SETTINGS_ENV: &str = "PHYSIOFLOW_CONFIG";

// ============================================================================
// Collector
// ============================================================================

pub const SEARCH_TERM: &str = "knee physiotherapy exercises";

pub const MAX_VIDEOS: usize = 10;

/// Preferred clip height in pixels.
pub const VIDEO_RESOLUTION: u32 = 360;

/// Sample exercise clips fetched when no downloader is available.
pub const SAMPLE_VIDEO_URLS: [&str; 2] = [
    "https://www.pexels.com/download/video/3766188/",
    "https://www.pexels.com/download/video/5380680/",
];

// ============================================================================
// Frames & Pose
// ============================================================================

/// Frames extracted per second of video.
pub const FRAME_FPS: u32 = 2;

/// Log a progress line every N frames.
pub const POSE_PROGRESS_EVERY: usize = 20;

// ============================================================================
// Training
// ============================================================================

/// Windows advance by `sequence_length / WINDOW_OVERLAP_DIVISOR` frames (50% overlap).
pub const WINDOW_OVERLAP_DIVISOR: usize = 2;

/// Seed for the deterministic train/validation shuffle.
pub const SPLIT_SEED: u64 = 42;

/// Epochs without `val_accuracy` improvement before the trainer stops.
pub const EARLY_STOPPING_PATIENCE: u32 = 10;

/// Metric monitored for checkpointing and early stopping.
pub const MONITOR_METRIC: &str = "val_accuracy";

/// Artifact file stem; the run timestamp is appended.
pub const MODEL_STEM: &str = "knee_exercise_model";

/// `chrono` format for run timestamps in artifact names.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ============================================================================
// Cloud
// ============================================================================

pub const CLOUD_REGION: &str = "us-central1";

pub const EXECUTOR_IMAGE: &str = "gcr.io/cloud-aiplatform/training/tf-gpu.2-12:latest";

pub const MACHINE_TYPE: &str = "n1-standard-8";

pub const ACCELERATOR_TYPE: &str = "NVIDIA_TESLA_T4";

pub const ACCELERATOR_COUNT: u32 = 1;

pub const TRAINER_PYTHON_MODULE: &str = "trainer.task";

/// Seconds between custom-job state polls.
pub const JOB_POLL_INTERVAL_SECS: u64 = 30;

/// HTTP client timeout for cloud API calls (seconds).
pub const CLOUD_HTTP_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Inference server
// ============================================================================

pub const SERVER_ADDR: &str = "0.0.0.0:8000";

pub const MAX_TOKENS: usize = 256;

pub const TEMPERATURE: f64 = 0.7;

/// Upper bound on a single generation request (seconds).
pub const GENERATION_TIMEOUT_SECS: u64 = 300;
