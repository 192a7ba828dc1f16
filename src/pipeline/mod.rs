//! End-to-End Training Pipeline
//!
//! Runs every stage in a scratch workdir and leaves only the final model:
//!
//! ```text
//! STEP 1: Collect videos (search → bulk download → sample clips)
//! STEP 2: Extract frames and pose landmarks
//! STEP 3: Upload landmarks → data/landmarks
//! STEP 4: Upload training config → config_<unix>.yaml
//! STEP 5: Managed training job (falls back to local training)
//! STEP 6: Download the first models/*.tflite into the output dir
//! STEP 7: Remove the workdir
//! ```
//!
//! Stage failures are logged and recorded in the [`PipelineSummary`]; `run`
//! itself never fails.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cloud::{self, JobSpec, ObjectStore, VertexClient};
use crate::collector::{self, VideoSource, YtDlpSource};
use crate::config::{Settings, TrainingConfig};
use crate::frames;
use crate::pose::{self, PoseEstimator};
use crate::training::{self, Trainer};

/// Object prefix for uploaded landmark tables.
pub const LANDMARKS_PREFIX: &str = "data/landmarks";
/// Object prefix for trained models.
pub const MODELS_PREFIX: &str = "models";

/// Where the model was trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingRoute {
    Cloud,
    Local,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub videos: usize,
    pub landmark_tables: usize,
    pub training: Option<TrainingRoute>,
    /// Downloaded model, if one was produced
    pub model: Option<PathBuf>,
    /// One entry per failed stage
    pub errors: Vec<String>,
}

impl PipelineSummary {
    pub fn succeeded(&self) -> bool {
        self.model.is_some()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct MlPipeline {
    settings: Settings,
    store: Arc<dyn ObjectStore>,
    /// `None` trains locally straight away
    jobs: Option<VertexClient>,
    source: Arc<dyn VideoSource>,
    estimator: Arc<dyn PoseEstimator>,
    trainer: Arc<dyn Trainer>,
    http: reqwest::Client,
    cancel: CancellationToken,
}

impl MlPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        store: Arc<dyn ObjectStore>,
        jobs: Option<VertexClient>,
        source: Arc<dyn VideoSource>,
        estimator: Arc<dyn PoseEstimator>,
        trainer: Arc<dyn Trainer>,
        http: reqwest::Client,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            store,
            jobs,
            source,
            estimator,
            trainer,
            http,
            cancel,
        }
    }

    /// Run the full pipeline and return what happened.
    pub async fn run(&self, search_term: &str, max_videos: usize, output_dir: &Path) -> PipelineSummary {
        let mut summary = PipelineSummary::default();

        let workdir = match tempfile::Builder::new().prefix("physioflow_").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "Cannot create workdir");
                summary.errors.push(format!("workdir: {e}"));
                return summary;
            }
        };
        info!(workdir = %workdir.path().display(), "Starting ML pipeline");

        if let Err(e) = self.run_stages(workdir.path(), search_term, max_videos, output_dir, &mut summary).await {
            error!(error = %format!("{e:#}"), "Pipeline stopped");
            summary.errors.push(format!("{e:#}"));
        }

        // STEP 7
        let path = workdir.path().to_path_buf();
        match workdir.close() {
            Ok(()) => info!(workdir = %path.display(), "Cleaned up workdir"),
            Err(e) => warn!(workdir = %path.display(), error = %e, "Failed to clean up workdir"),
        }

        match &summary.model {
            Some(model) => info!(model = %model.display(), route = ?summary.training, "ML pipeline completed successfully"),
            None => warn!(errors = summary.errors.len(), "ML pipeline finished without a model"),
        }
        summary
    }

    async fn run_stages(
        &self,
        workdir: &Path,
        search_term: &str,
        max_videos: usize,
        output_dir: &Path,
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        let videos_dir = workdir.join("videos");
        let frames_dir = workdir.join("frames");
        let landmarks_dir = workdir.join("landmarks");

        // STEP 1
        info!("Step 1: Collecting videos");
        let collector_cfg = &self.settings.collector;
        let bulk = YtDlpSource::new(collector_cfg.ytdlp_bin.clone(), collector_cfg.resolution);
        let report = collector::collect_with_fallback(
            self.source.as_ref(),
            &bulk,
            &self.http,
            &collector_cfg.sample_urls,
            search_term,
            max_videos,
            &videos_dir,
        )
        .await
        .context("video collection failed")?;
        summary.videos = report.total_available();
        info!(videos = summary.videos, method = ?report.method, "Videos collected");

        // STEP 2
        info!("Step 2: Extracting frames and landmarks");
        summary.landmark_tables = self
            .extract_landmarks(&videos_dir, &frames_dir, &landmarks_dir)
            .await?;

        self.store.ensure_bucket().await.context("bucket setup failed")?;

        // STEP 3
        info!("Step 3: Uploading landmarks");
        let landmarks_uri = cloud::upload_dir(self.store.as_ref(), &landmarks_dir, LANDMARKS_PREFIX)
            .await
            .context("landmark upload failed")?;

        // STEP 4
        info!("Step 4: Uploading training config");
        let unix = unix_now();
        let config_path = self.settings.paths.training_config.clone();
        let config = if config_path.exists() {
            TrainingConfig::load(&config_path)?
        } else {
            info!(path = %config_path.display(), "Writing default training config");
            TrainingConfig::write_default(&config_path)?
        };
        let config_uri = cloud::upload_dir(self.store.as_ref(), &config_path, &format!("config_{unix}.yaml"))
            .await
            .context("config upload failed")?;

        // STEP 5
        info!("Step 5: Training model");
        let route = match self.train_in_cloud(workdir, unix, &config_uri, &landmarks_uri).await {
            Ok(()) => TrainingRoute::Cloud,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Managed training unavailable, attempting local training");
                summary.errors.push(format!("cloud training: {e:#}"));
                self.train_locally(workdir, &config, &landmarks_uri, &videos_dir).await?;
                TrainingRoute::Local
            }
        };
        summary.training = Some(route);

        // STEP 6
        info!("Step 6: Downloading trained model");
        summary.model = self.download_model(output_dir).await?;
        Ok(())
    }

    async fn extract_landmarks(&self, videos_dir: &Path, frames_dir: &Path, landmarks_dir: &Path) -> Result<usize> {
        let frames_cfg = self.settings.frames.clone();
        let progress_every = self.settings.pose.progress_every;
        let estimator = Arc::clone(&self.estimator);
        let (videos, frames, landmarks) = (
            videos_dir.to_path_buf(),
            frames_dir.to_path_buf(),
            landmarks_dir.to_path_buf(),
        );

        tokio::task::spawn_blocking(move || -> Result<usize> {
            frames::extract_frames(&frames_cfg.ffmpeg_bin, &videos, &frames, frames_cfg.fps)?;
            let results = pose::process_all_videos(estimator.as_ref(), &frames, &landmarks, progress_every)?;
            Ok(results
                .iter()
                .filter(|(_, r)| matches!(r, Ok(pose::FolderOutcome::Written { .. })))
                .count())
        })
        .await
        .context("landmark extraction task panicked")?
        .context("landmark extraction failed")
    }

    async fn train_in_cloud(&self, workdir: &Path, unix: u64, config_uri: &str, landmarks_uri: &str) -> Result<()> {
        let Some(jobs) = &self.jobs else {
            anyhow::bail!("no managed training client configured");
        };

        let package = cloud::package_trainer(&self.settings.cloud.trainer_package, &workdir.join("package"))?;
        let package_uri = cloud::upload_dir(
            self.store.as_ref(),
            &package,
            &format!("code/physioflow_training_{unix}/{}", cloud::PACKAGE_FILE),
        )
        .await?;

        let spec = JobSpec::physioflow(unix, package_uri, config_uri, landmarks_uri, self.store.bucket());
        jobs.run(&spec, &self.cancel).await?;
        info!(uri = %self.store.uri(MODELS_PREFIX), "Model artifacts available");
        Ok(())
    }

    /// Train on landmarks pulled back from storage, then publish the models.
    async fn train_locally(
        &self,
        workdir: &Path,
        config: &TrainingConfig,
        landmarks_uri: &str,
        videos_dir: &Path,
    ) -> Result<()> {
        let local_landmarks = workdir.join("landmarks_from_gcs");
        let prefix = cloud::object_path(landmarks_uri, self.store.bucket());
        cloud::download_prefix(self.store.as_ref(), prefix, &local_landmarks)
            .await
            .context("landmark download failed")?;

        let models_dir = workdir.join("models");
        let trainer = Arc::clone(&self.trainer);
        let config = config.clone();
        let (videos, models) = (videos_dir.to_path_buf(), models_dir.clone());
        let tflite = tokio::task::spawn_blocking(move || {
            training::train_model(&config, trainer.as_ref(), &local_landmarks, &videos, &models)
        })
        .await
        .context("training task panicked")?
        .context("local training failed")?;
        info!(model = %tflite.display(), "Local training complete");

        cloud::upload_dir(self.store.as_ref(), &models_dir, MODELS_PREFIX)
            .await
            .context("model upload failed")?;
        Ok(())
    }

    async fn download_model(&self, output_dir: &Path) -> Result<Option<PathBuf>> {
        let names = self.store.list(&format!("{MODELS_PREFIX}/")).await?;
        let Some(name) = names.iter().find(|n| n.ends_with(".tflite")) else {
            warn!("No TFLite model found in {}", self.store.uri(MODELS_PREFIX));
            return Ok(None);
        };

        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("cannot create {}", output_dir.display()))?;
        let file_name = name.rsplit('/').next().unwrap_or(name.as_str());
        let target = output_dir.join(file_name);
        self.store.download(name, &target).await?;
        info!(model = %target.display(), "Model downloaded");
        Ok(Some(target))
    }
}
