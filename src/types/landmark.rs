//! Pose landmark types

use serde::{Deserialize, Serialize};

/// Number of values stored per landmark (x, y, z, visibility).
pub const LANDMARK_DIMS: usize = 4;

/// A single body keypoint estimate.
///
/// `x` and `y` are normalized image coordinates, `z` is relative depth and
/// `visibility` is the estimator's confidence that the point is visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    pub const fn to_array(self) -> [f32; LANDMARK_DIMS] {
        [self.x, self.y, self.z, self.visibility]
    }

    /// Build from a row of up to four values; missing trailing values are zero.
    pub fn from_slice(values: &[f32]) -> Self {
        let get = |i: usize| values.get(i).copied().unwrap_or(0.0);
        Self::new(get(0), get(1), get(2), get(3))
    }
}

/// All landmarks detected in one extracted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLandmarks {
    /// Frame file name, e.g. `0007.jpg`
    pub frame: String,
    pub landmarks: Vec<Landmark>,
    /// Position of the frame in the sorted frame listing (gaps mean no detection)
    pub frame_index: i64,
}

impl FrameLandmarks {
    /// Flatten to `[x0, y0, z0, v0, x1, ...]`.
    pub fn flatten(&self) -> Vec<f32> {
        self.landmarks
            .iter()
            .flat_map(|lm| lm.to_array())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_order() {
        let frame = FrameLandmarks {
            frame: "0001.jpg".to_string(),
            landmarks: vec![Landmark::new(0.1, 0.2, 0.3, 0.9), Landmark::new(0.4, 0.5, 0.6, 0.8)],
            frame_index: 0,
        };
        assert_eq!(frame.flatten(), vec![0.1, 0.2, 0.3, 0.9, 0.4, 0.5, 0.6, 0.8]);
    }

    #[test]
    fn test_from_short_slice_pads_with_zero() {
        let lm = Landmark::from_slice(&[0.5, 0.25]);
        assert_eq!(lm, Landmark::new(0.5, 0.25, 0.0, 0.0));
    }
}
