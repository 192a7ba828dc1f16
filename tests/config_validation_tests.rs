//! Config Validation Tests
//!
//! Typo detection for `physioflow.toml` and range validation for both the
//! settings file and the training YAML.

use physioflow::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use physioflow::config::{ConfigError, Settings, TrainingConfig};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_cloud_section_warns_with_suggestion() {
    let warnings = validate_unknown_keys("[cloud]\nbuckt = \"physioflow-data\"\n");
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("cloud.bucket"));
}

#[test]
fn unknown_section_warns() {
    let warnings = validate_unknown_keys("[wells]\nname = \"x\"\n");
    assert!(warnings.iter().any(|w| w.field == "wells"));
}

#[test]
fn every_default_key_is_known() {
    let toml_str = Settings::default().to_toml().unwrap();
    let warnings = validate_unknown_keys(&toml_str);
    assert!(warnings.is_empty(), "Default settings produced warnings: {warnings:?}");
}

#[test]
fn far_off_key_has_no_suggestion() {
    let known = known_config_keys();
    assert!(suggest_correction("zzzzzzzzzzzzzzzz", &known).is_none());
}

#[test]
fn typo_does_not_break_loading() {
    let settings = Settings::from_toml_str("[frames]\nfsp = 5\n").unwrap();
    assert_eq!(settings.frames.fps, 2);
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn settings_report_every_violation() {
    let err = Settings::from_toml_str(
        r#"
[collector]
max_videos = 0

[frames]
fps = 0

[server]
addr = "not-an-address"
"#,
    )
    .unwrap_err();

    match err {
        ConfigError::Validation(errors) => assert_eq!(errors.len(), 3, "{errors:?}"),
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn mistralrs_backend_requires_model_path() {
    let err = Settings::from_toml_str("[server]\nbackend = \"mistralrs\"\n").unwrap_err();
    assert!(err.to_string().contains("server.model_path"));
}

#[test]
fn training_yaml_reports_every_violation() {
    let yaml = r#"
training:
  sequence_length: 1
  validation_split: 1.5
  model:
    lstm_units: [64]
  classes: [squat, squat]
"#;
    let config = TrainingConfig::from_yaml(yaml).unwrap();
    match config.validate() {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 4, "{errors:?}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn default_training_config_roundtrips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ml/training/config.yaml");

    let written = TrainingConfig::write_default(&path).unwrap();
    let loaded = TrainingConfig::load(&path).unwrap();

    assert_eq!(written, loaded);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("training:"));
}
