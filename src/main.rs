//! PhysioFlow ML command-line entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use physioflow::api::{create_app, ApiState};
use physioflow::cloud::{self, GcsStore, LocalStore, ObjectStore, VertexClient};
use physioflow::collector::{self, YtDlpSource};
use physioflow::config::{self, defaults, BackendKind, Settings, TrainingConfig};
use physioflow::pipeline::MlPipeline;
use physioflow::pose::{self, CommandPoseEstimator, PoseError, VideoIntelligenceClient};
use physioflow::training::{self, CommandTrainer};
use physioflow::{frames, llm};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "physioflow")]
#[command(about = "PhysioFlow knee-exercise ML pipeline and assistant server")]
#[command(version)]
struct CliArgs {
    /// Settings file (default: ./physioflow.toml, then built-in defaults)
    #[arg(long, global = true, env = "PHYSIOFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Search and download exercise videos
    Collect {
        #[arg(long)]
        search_term: Option<String>,
        #[arg(long)]
        max_videos: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Extract JPEG frames from downloaded videos
    ExtractFrames {
        #[arg(long)]
        videos: Option<PathBuf>,
        #[arg(long)]
        frames: Option<PathBuf>,
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Extract pose landmarks from frame folders
    Pose {
        #[arg(long)]
        frames: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Annotate clips in object storage with the Video Intelligence API instead (repeatable)
        #[arg(long = "video-uri")]
        video_uris: Vec<String>,
    },

    /// Train the exercise classifier locally
    Train {
        /// Training YAML (written with defaults if missing)
        #[arg(long)]
        training_config: Option<PathBuf>,
        #[arg(long)]
        landmarks: Option<PathBuf>,
        #[arg(long)]
        videos: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run collection, extraction, cloud training and model download end to end
    Pipeline {
        #[arg(long)]
        search_term: Option<String>,
        #[arg(long)]
        max_videos: Option<usize>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Use a filesystem bucket under this directory and train locally
        #[arg(long)]
        local_store: Option<PathBuf>,
    },

    /// Serve the physiotherapy assistant API
    Serve {
        /// Override the server address (default: "0.0.0.0:8000")
        #[arg(short, long)]
        addr: Option<String>,
        /// Backend: "http" or "mistralrs"
        #[arg(long, value_parser = ["http", "mistralrs"])]
        backend: Option<String>,
        /// GGUF model for the mistralrs backend
        #[arg(long)]
        model_path: Option<String>,
        /// Completion server for the http backend
        #[arg(long)]
        backend_url: Option<String>,
    },

    /// Write default settings and training config files
    InitConfig {
        #[arg(long, default_value = defaults::SETTINGS_FILE)]
        out: PathBuf,
        #[arg(long, default_value = defaults::TRAINING_CONFIG_PATH)]
        training_out: PathBuf,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(p) => Settings::load_from_file(p).with_context(|| format!("Failed to load {}", p.display())),
        None => Ok(Settings::load()),
    }
}

fn load_training_config(path: &Path) -> Result<TrainingConfig> {
    if path.exists() {
        Ok(TrainingConfig::load(path)?)
    } else {
        warn!(path = %path.display(), "Training config not found, writing defaults");
        Ok(TrainingConfig::write_default(path)?)
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(defaults::CLOUD_HTTP_TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client")
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_collect(settings: &Settings, term: String, max: usize, out: PathBuf) -> Result<()> {
    let cfg = &settings.collector;
    let source = YtDlpSource::new(cfg.ytdlp_bin.clone(), cfg.resolution);
    let report = collector::collect_with_fallback(
        &source,
        &source,
        &http_client()?,
        &cfg.sample_urls,
        &term,
        max,
        &out,
    )
    .await?;

    info!(
        method = ?report.method,
        downloaded = report.downloaded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Downloaded {} videos to {}",
        report.total_available(),
        out.display()
    );
    Ok(())
}

async fn run_pipeline(
    settings: Settings,
    term: String,
    max: usize,
    output_dir: PathBuf,
    local_store: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    let http = http_client()?;
    let cloud_cfg = settings.cloud.clone();
    let bucket = if cloud_cfg.bucket.is_empty() {
        format!("{}-physioflow-data", cloud_cfg.project_id)
    } else {
        cloud_cfg.bucket.clone()
    };

    let (store, jobs): (Arc<dyn ObjectStore>, Option<VertexClient>) = match local_store {
        Some(root) => {
            info!(root = %root.display(), "Using local object store, training locally");
            (Arc::new(LocalStore::new(root, bucket)), None)
        }
        None => {
            if cloud_cfg.project_id.is_empty() {
                anyhow::bail!("cloud.project_id must be set (or pass --local-store)");
            }
            let token = cloud::access_token().await?;
            let store = GcsStore::new(
                http.clone(),
                token.clone(),
                cloud_cfg.project_id.clone(),
                cloud_cfg.region.clone(),
                bucket,
            );
            (Arc::new(store), Some(VertexClient::new(http.clone(), token, cloud_cfg)))
        }
    };

    let source = Arc::new(YtDlpSource::new(
        settings.collector.ytdlp_bin.clone(),
        settings.collector.resolution,
    ));
    let estimator = Arc::new(CommandPoseEstimator::new(
        settings.pose.command.clone(),
        settings.pose.args.clone(),
    ));
    let trainer = Arc::new(CommandTrainer::new(
        settings.trainer.command.clone(),
        settings.trainer.args.clone(),
    ));

    let pipeline = MlPipeline::new(settings, store, jobs, source, estimator, trainer, http, cancel);
    let summary = pipeline.run(&term, max, &output_dir).await;

    for e in &summary.errors {
        warn!(error = %e, "Pipeline stage failed");
    }
    match summary.model {
        Some(model) => {
            info!(model = %model.display(), "Model ready");
            Ok(())
        }
        None => Err(anyhow::anyhow!("Pipeline finished without a model")),
    }
}

/// Landmarks for clips already in object storage, one table per URI.
async fn run_video_annotation(
    settings: &Settings,
    video_uris: &[String],
    out: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let token = cloud::access_token().await?;
    let client = VideoIntelligenceClient::new(
        http_client()?,
        token,
        Duration::from_secs(settings.cloud.poll_interval_secs.max(1)),
    );

    let mut failed = 0;
    for uri in video_uris {
        match client.annotate_to_table(uri, out, cancel).await {
            Ok(outcome) => info!(uri = %uri, ?outcome, "Clip annotated"),
            Err(PoseError::Cancelled) => return Err(PoseError::Cancelled.into()),
            Err(e) => {
                warn!(uri = %uri, error = %e, "Video annotation failed");
                failed += 1;
            }
        }
    }
    info!(clips = video_uris.len(), failed, "Landmark extraction complete");
    if failed == video_uris.len() {
        anyhow::bail!("No clip could be annotated");
    }
    Ok(())
}

async fn run_server(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let server = &settings.server;

    #[cfg(feature = "llm")]
    if llm::is_cuda_available() {
        info!("Hardware: CUDA detected - LLM inference will use GPU");
    }

    let backend = llm::create_backend(server)
        .await
        .context("Failed to load the LLM backend")?;
    let app = create_app(ApiState::new(backend));

    let listener = tokio::net::TcpListener::bind(&server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", server.addr))?;
    info!("PhysioFlow assistant listening on http://{}", server.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("[HttpServer] Received shutdown signal");
        })
        .await
        .context("HTTP server error")?;

    info!("[HttpServer] Graceful shutdown complete");
    Ok(())
}

fn run_init_config(out: &Path, training_out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        warn!(path = %out.display(), "Settings file exists, skipping (use --force)");
    } else {
        Settings::default().save_to_file(out)?;
    }

    if training_out.exists() && !force {
        warn!(path = %training_out.display(), "Training config exists, skipping (use --force)");
    } else {
        TrainingConfig::write_default(training_out)?;
        info!(path = %training_out.display(), "Training config written");
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    if let SubCommand::InitConfig {
        out,
        training_out,
        force,
    } = &args.command
    {
        return run_init_config(out, training_out, *force);
    }

    config::init(load_settings(args.config.as_deref())?);
    let mut settings = config::get().clone();

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let result = match args.command {
        SubCommand::Collect {
            search_term,
            max_videos,
            out,
        } => {
            let term = search_term.unwrap_or_else(|| settings.collector.search_term.clone());
            let max = max_videos.unwrap_or(settings.collector.max_videos);
            let out = out.unwrap_or_else(|| settings.paths.videos.clone());
            run_collect(&settings, term, max, out).await
        }

        SubCommand::ExtractFrames {
            videos,
            frames: frames_dir,
            fps,
        } => {
            let videos = videos.unwrap_or_else(|| settings.paths.videos.clone());
            let frames_dir = frames_dir.unwrap_or_else(|| settings.paths.frames.clone());
            let fps = fps.unwrap_or(settings.frames.fps);
            let ffmpeg = settings.frames.ffmpeg_bin.clone();
            tokio::task::spawn_blocking(move || frames::extract_frames(&ffmpeg, &videos, &frames_dir, fps))
                .await?
                .map(|_| ())
                .map_err(Into::into)
        }

        SubCommand::Pose {
            frames: frames_dir,
            out,
            video_uris,
        } => {
            let frames_dir = frames_dir.unwrap_or_else(|| settings.paths.frames.clone());
            let out = out.unwrap_or_else(|| settings.paths.landmarks.clone());
            if video_uris.is_empty() {
                let estimator = CommandPoseEstimator::new(settings.pose.command.clone(), settings.pose.args.clone());
                let every = settings.pose.progress_every;
                tokio::task::spawn_blocking(move || {
                    pose::process_all_videos(&estimator, &frames_dir, &out, every).map(|results| {
                        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                        info!(folders = results.len(), failed, "Landmark extraction complete");
                    })
                })
                .await?
                .map_err(Into::into)
            } else {
                run_video_annotation(&settings, &video_uris, &out, &cancel_token).await
            }
        }

        SubCommand::Train {
            training_config,
            landmarks,
            videos,
            out,
        } => {
            let config_path = training_config.unwrap_or_else(|| settings.paths.training_config.clone());
            let config = load_training_config(&config_path)?;
            let landmarks = landmarks.unwrap_or_else(|| settings.paths.landmarks.clone());
            let videos = videos.unwrap_or_else(|| settings.paths.videos.clone());
            let out = out.unwrap_or_else(|| settings.paths.models.clone());
            let trainer = CommandTrainer::new(settings.trainer.command.clone(), settings.trainer.args.clone());
            tokio::task::spawn_blocking(move || {
                training::train_model(&config, &trainer, &landmarks, &videos, &out)
            })
            .await?
            .map(|tflite| info!(model = %tflite.display(), "Training complete"))
            .map_err(Into::into)
        }

        SubCommand::Pipeline {
            search_term,
            max_videos,
            output_dir,
            local_store,
        } => {
            let term = search_term.unwrap_or_else(|| settings.collector.search_term.clone());
            let max = max_videos.unwrap_or(settings.collector.max_videos);
            let output_dir = output_dir.unwrap_or_else(|| settings.paths.models.clone());
            run_pipeline(settings, term, max, output_dir, local_store, cancel_token).await
        }

        SubCommand::Serve {
            addr,
            backend,
            model_path,
            backend_url,
        } => {
            if let Some(addr) = addr {
                settings.server.addr = addr;
            }
            if let Some(kind) = backend {
                settings.server.backend = if kind == "mistralrs" {
                    BackendKind::MistralRs
                } else {
                    BackendKind::Http
                };
            }
            if let Some(path) = model_path {
                settings.server.model_path = path;
            }
            if let Some(url) = backend_url {
                settings.server.backend_url = url;
            }
            run_server(&settings, cancel_token).await
        }

        SubCommand::InitConfig { .. } => Ok(()),
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Command failed");
    }
    result
}
