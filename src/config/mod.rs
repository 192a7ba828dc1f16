//! Configuration Module
//!
//! Two layers:
//!
//! - [`Settings`]: workspace paths, external tools, cloud and server options,
//!   loaded from TOML (`$PHYSIOFLOW_CONFIG` → `./physioflow.toml` → defaults).
//! - [`TrainingConfig`]: the YAML training file shared with the trainers.
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(Settings::load());
//!
//! // Anywhere in the binary:
//! let fps = config::get().frames.fps;
//! ```

pub mod defaults;
mod settings;
mod training;
pub mod validation;

pub use settings::*;
pub use training::*;

use std::path::PathBuf;
use std::sync::OnceLock;

/// Configuration errors shared by both layers.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({0:?}): {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({0:?}): {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Training config error ({0:?}): {1}")]
    Yaml(PathBuf, #[source] serde_yaml::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

/// Global settings, initialized once at startup.
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Initialize the global settings. Later calls are ignored with a warning.
pub fn init(settings: Settings) {
    if SETTINGS.set(settings).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global settings.
///
/// Panics if `init()` has not been called; a missing config is a startup bug.
#[allow(clippy::expect_used)]
pub fn get() -> &'static Settings {
    SETTINGS
        .get()
        .expect("config::get() called before config::init()")
}
