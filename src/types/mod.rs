//! Shared data structures passed between pipeline stages
//!
//! - Landmarks: per-frame pose keypoints produced by the pose stage
//! - Video: search hits and the JSON metadata sidecar written by the collector
//! - Exercise: the class vocabulary assigned to training windows

mod exercise;
mod landmark;
mod video;

pub use exercise::*;
pub use landmark::*;
pub use video::*;
