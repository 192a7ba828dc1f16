//! Pipeline Regression Tests
//!
//! Drives `MlPipeline::run()` against a filesystem object store with every
//! external tool missing. The run must report the failure instead of
//! returning an error, and must not leave a model behind.

use physioflow::cloud::{LocalStore, ObjectStore};
use physioflow::collector::CollectError;
use physioflow::pipeline::{MlPipeline, LANDMARKS_PREFIX};
use physioflow::pose::{PoseError, PoseEstimator};
use physioflow::training::{TrainedArtifacts, Trainer, TrainingError, TrainingJob};
use physioflow::{Landmark, SearchResult, Settings, VideoSource};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fakes
// ============================================================================

struct OfflineSource;

#[async_trait]
impl VideoSource for OfflineSource {
    async fn search(&self, _term: &str, _max: usize) -> Result<Vec<SearchResult>, CollectError> {
        Err(CollectError::Search("network unreachable".to_string()))
    }

    async fn download(&self, result: &SearchResult, _dest: &Path) -> Result<(), CollectError> {
        Err(CollectError::Download {
            id: result.id.clone(),
            reason: "network unreachable".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

struct NeverCalledEstimator;

impl PoseEstimator for NeverCalledEstimator {
    fn estimate(&self, _image: &Path) -> Result<Option<Vec<Landmark>>, PoseError> {
        panic!("no frames should reach the estimator");
    }

    fn name(&self) -> &str {
        "never"
    }
}

struct NeverCalledTrainer;

impl Trainer for NeverCalledTrainer {
    fn train(&self, _job: &TrainingJob, _job_file: &Path) -> Result<TrainedArtifacts, TrainingError> {
        panic!("training should not start without landmarks");
    }

    fn name(&self) -> &str {
        "never"
    }
}

fn offline_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.collector.ytdlp_bin = root.join("missing-yt-dlp").display().to_string();
    settings.collector.sample_urls = Vec::new();
    settings.frames.ffmpeg_bin = root.join("missing-ffmpeg").display().to_string();
    settings.paths.training_config = root.join("config.yaml");
    settings
}

fn pipeline(settings: Settings, store: Arc<dyn ObjectStore>) -> MlPipeline {
    MlPipeline::new(
        settings,
        store,
        None,
        Arc::new(OfflineSource),
        Arc::new(NeverCalledEstimator),
        Arc::new(NeverCalledTrainer),
        reqwest::Client::new(),
        CancellationToken::new(),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn missing_tools_produce_summary_without_model() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(root.path().join("store"), "physioflow-test"));
    let output = root.path().join("out");

    let summary = pipeline(offline_settings(root.path()), store.clone())
        .run("knee exercises", 2, &output)
        .await;

    assert!(!summary.succeeded());
    assert!(summary.model.is_none());
    assert_eq!(summary.videos, 0);
    assert_eq!(summary.training, None);
    assert_eq!(summary.errors.len(), 1, "{:?}", summary.errors);
    assert!(summary.errors[0].contains("ffmpeg"), "{:?}", summary.errors);
    assert!(!output.exists());
}

#[tokio::test]
async fn failed_run_uploads_nothing() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(root.path().join("store"), "physioflow-test"));

    let _ = pipeline(offline_settings(root.path()), store.clone())
        .run("knee exercises", 2, &root.path().join("out"))
        .await;

    assert!(store.list(LANDMARKS_PREFIX).await.unwrap().is_empty());
    assert!(store.list("config_").await.unwrap().is_empty());
}
