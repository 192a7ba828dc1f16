//! PhysioFlow ML: knee-exercise recognition pipeline
//!
//! Stages, each usable on its own or chained by [`pipeline::MlPipeline`]:
//!
//! - **collector**: search and download exercise clips with metadata sidecars
//! - **frames**: sample JPEG frames with ffmpeg
//! - **pose**: per-frame body landmarks into parquet tables
//! - **dataset**: labelled, overlapping landmark windows
//! - **training**: local model training through an external trainer
//! - **cloud**: object storage and managed training jobs
//! - **api** + **llm**: the physiotherapy assistant HTTP service

pub mod api;
pub mod cloud;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod frames;
pub mod landmarks;
pub mod llm;
pub mod pipeline;
pub mod pose;
pub mod training;
pub mod types;

// Re-export configuration
pub use config::{Settings, TrainingConfig};

// Re-export commonly used types
pub use types::{ExerciseClass, FrameLandmarks, Landmark, SearchResult, VideoMetadata};

// Re-export stage entry points
pub use collector::{collect_with_fallback, download_videos, CollectReport, VideoSource, YtDlpSource};
pub use dataset::{classify_title, load_dataset, sliding_windows, Dataset, DatasetError};
pub use landmarks::{read_landmarks, write_landmarks};
pub use pipeline::{MlPipeline, PipelineSummary};
pub use pose::{process_all_videos, process_frames, CommandPoseEstimator, PoseEstimator};
pub use training::{train_model, CommandTrainer, ModelSpec, Trainer};

// Re-export LLM components
pub use llm::{GenerationParams, LlmBackend};
