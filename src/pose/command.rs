//! Pose estimator backed by an external program.
//!
//! The program receives the image path as its last argument and prints one
//! JSON document on stdout:
//!
//! ```json
//! {"landmarks": [[x, y, z, visibility], ...]}
//! {"landmarks": null}
//! ```
//!
//! A bare `null` also means "no person".

use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use super::{PoseError, PoseEstimator};
use crate::types::Landmark;

#[derive(Debug, Deserialize)]
struct EstimatorOutput {
    #[serde(default)]
    landmarks: Option<Vec<Vec<f32>>>,
}

/// Decode estimator stdout.
pub(crate) fn parse_output(stdout: &str) -> Result<Option<Vec<Landmark>>, serde_json::Error> {
    let parsed: Option<EstimatorOutput> = serde_json::from_str(stdout.trim())?;
    Ok(parsed
        .and_then(|o| o.landmarks)
        .filter(|rows| !rows.is_empty())
        .map(|rows| rows.iter().map(|r| Landmark::from_slice(r)).collect()))
}

#[derive(Debug, Clone)]
pub struct CommandPoseEstimator {
    program: String,
    args: Vec<String>,
}

impl CommandPoseEstimator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl PoseEstimator for CommandPoseEstimator {
    fn estimate(&self, image: &Path) -> Result<Option<Vec<Landmark>>, PoseError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|source| PoseError::Io {
                path: image.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(PoseError::Estimator {
                image: image.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_output(&String::from_utf8_lossy(&output.stdout)).map_err(|e| PoseError::Estimator {
            image: image.to_path_buf(),
            reason: format!("invalid output: {e}"),
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}
