//! Exercise class vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Knee exercise classes recognised by the sequence classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseClass {
    #[default]
    Squat,
    LegRaise,
    StepUp,
}

impl ExerciseClass {
    pub const ALL: [Self; 3] = [Self::Squat, Self::LegRaise, Self::StepUp];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Squat => "squat",
            Self::LegRaise => "leg_raise",
            Self::StepUp => "step_up",
        }
    }
}

impl fmt::Display for ExerciseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExerciseClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown exercise class '{s}'"))
    }
}
