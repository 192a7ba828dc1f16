//! Last-resort sample clips fetched over plain HTTP.

use std::path::Path;
use tracing::{info, warn};

use super::{ensure_dir, CollectError, CollectMethod, CollectReport};

/// Fetch up to `max_videos` of `urls` into `video_<n>.mp4` (1-based).
///
/// Existing files are kept; a failed URL is logged and recorded.
pub async fn fetch_sample_clips(
    client: &reqwest::Client,
    urls: &[String],
    max_videos: usize,
    out_dir: &Path,
) -> Result<CollectReport, CollectError> {
    ensure_dir(out_dir)?;
    let mut report = CollectReport {
        method: CollectMethod::SampleClips,
        ..CollectReport::default()
    };

    for (i, url) in urls.iter().take(max_videos).enumerate() {
        let target = out_dir.join(format!("video_{}.mp4", i + 1));
        if target.exists() {
            report.skipped.push(target);
            continue;
        }

        info!(url = %url, "Downloading sample video {}", i + 1);
        let outcome = async {
            let bytes = client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            tokio::fs::write(&target, &bytes)
                .await
                .map_err(|source| CollectError::Io {
                    path: target.clone(),
                    source,
                })
        }
        .await;

        match outcome {
            Ok(()) => report.downloaded.push(target),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to download sample video");
                report.failed.push((url.clone(), e.to_string()));
            }
        }
    }

    info!(downloaded = report.downloaded.len(), "Sample clip download complete");
    Ok(report)
}
