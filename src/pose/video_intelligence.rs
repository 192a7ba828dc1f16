//! Managed alternative: person detection with pose landmarks from the
//! Video Intelligence API, run directly on a clip in object storage.

use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{FolderOutcome, PoseError};
use crate::landmarks;
use crate::types::{FrameLandmarks, Landmark};

const DEFAULT_ENDPOINT: &str = "https://videointelligence.googleapis.com/v1";

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    response: Option<AnnotateResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    #[serde(default)]
    annotation_results: Vec<AnnotationResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationResult {
    #[serde(default)]
    person_detection_annotations: Vec<PersonDetection>,
}

#[derive(Debug, Default, Deserialize)]
struct PersonDetection {
    #[serde(default)]
    tracks: Vec<Track>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Track {
    #[serde(default)]
    timestamped_objects: Vec<TimestampedObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimestampedObject {
    #[serde(default)]
    time_offset: String,
    #[serde(default)]
    landmarks: Vec<DetectedLandmark>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectedLandmark {
    #[serde(default)]
    point: Point,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Default, Deserialize)]
struct Point {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

/// `"1.500s"` → 1.5
fn offset_seconds(offset: &str) -> f64 {
    offset.trim_end_matches('s').parse().unwrap_or(0.0)
}

/// Flatten every tracked object into time-ordered frames.
fn to_frames(response: AnnotateResponse) -> Vec<FrameLandmarks> {
    let mut objects: Vec<TimestampedObject> = response
        .annotation_results
        .into_iter()
        .flat_map(|r| r.person_detection_annotations)
        .flat_map(|p| p.tracks)
        .flat_map(|t| t.timestamped_objects)
        .filter(|o| !o.landmarks.is_empty())
        .collect();
    objects.sort_by(|a, b| offset_seconds(&a.time_offset).total_cmp(&offset_seconds(&b.time_offset)));

    objects
        .into_iter()
        .enumerate()
        .map(|(i, o)| FrameLandmarks {
            frame: o.time_offset,
            landmarks: o
                .landmarks
                .iter()
                .map(|l| Landmark::new(l.point.x, l.point.y, 0.0, l.confidence))
                .collect(),
            frame_index: i64::try_from(i).unwrap_or(i64::MAX),
        })
        .collect()
}

/// Clip name for a storage URI: `gs://b/videos/video_abc.mp4` → `video_abc`.
pub fn clip_name(input_uri: &str) -> String {
    let last = input_uri.rsplit('/').next().unwrap_or(input_uri);
    Path::new(last)
        .file_stem()
        .map_or_else(|| last.to_string(), |s| s.to_string_lossy().into_owned())
}

pub struct VideoIntelligenceClient {
    http: reqwest::Client,
    token: String,
    endpoint: String,
    poll_interval: Duration,
}

impl VideoIntelligenceClient {
    pub fn new(http: reqwest::Client, token: String, poll_interval: Duration) -> Self {
        Self {
            http,
            token,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, PoseError> {
        Ok(self
            .http
            .get(format!("{}/{name}", self.endpoint))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Annotate a `gs://` clip and wait for the result.
    pub async fn annotate(
        &self,
        input_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FrameLandmarks>, PoseError> {
        let body = json!({
            "inputUri": input_uri,
            "features": ["PERSON_DETECTION"],
            "videoContext": {
                "personDetectionConfig": {
                    "includeBoundingBoxes": true,
                    "includePoseLandmarks": true,
                    "includeAttributes": false
                }
            }
        });

        let mut op: Operation = self
            .http
            .post(format!("{}/videos:annotate", self.endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(operation = %op.name, uri = %input_uri, "Video annotation started");

        while !op.done {
            tokio::select! {
                () = cancel.cancelled() => return Err(PoseError::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
            op = self.get_operation(&op.name).await?;
            debug!(operation = %op.name, done = op.done, "Polled annotation");
        }

        if let Some(error) = op.error {
            return Err(PoseError::Annotation(error.to_string()));
        }
        let frames = to_frames(op.response.unwrap_or_default());
        info!(uri = %input_uri, frames = frames.len(), "Video annotation complete");
        Ok(frames)
    }

    /// Annotate a clip and write `out_dir/<clip>_landmarks.parquet`.
    ///
    /// An existing table is left alone, as with frame folders.
    pub async fn annotate_to_table(
        &self,
        input_uri: &str,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<FolderOutcome, PoseError> {
        let table = landmarks::table_path(out_dir, &clip_name(input_uri));
        if table.exists() {
            info!(table = %table.display(), "Landmarks already exist, skipping");
            return Ok(FolderOutcome::Skipped(table));
        }

        let frames = self.annotate(input_uri, cancel).await?;
        if frames.is_empty() {
            return Ok(FolderOutcome::NoDetections);
        }
        std::fs::create_dir_all(out_dir).map_err(|source| PoseError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;
        landmarks::write_landmarks(&table, &frames)?;
        info!(table = %table.display(), frames = frames.len(), "Saved landmarks");
        Ok(FolderOutcome::Written {
            table,
            frames: frames.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use axum::Json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_frames_sorted_by_time_offset() {
        let response: AnnotateResponse = serde_json::from_str(
            r#"{
              "annotationResults": [{
                "personDetectionAnnotations": [
                  {"tracks": [{"timestampedObjects": [
                    {"timeOffset": "2.5s", "landmarks": [{"name": "left_knee", "point": {"x": 0.4, "y": 0.6}, "confidence": 0.8}]},
                    {"timeOffset": "0.5s", "landmarks": [{"name": "left_knee", "point": {"x": 0.1, "y": 0.2}, "confidence": 0.9}]}
                  ]}]},
                  {"tracks": [{"timestampedObjects": [
                    {"timeOffset": "1s", "landmarks": []}
                  ]}]}
                ]
              }]
            }"#,
        )
        .unwrap();

        let frames = to_frames(response);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame, "0.5s");
        assert_eq!(frames[0].frame_index, 0);
        assert_eq!(frames[0].landmarks[0], Landmark::new(0.1, 0.2, 0.0, 0.9));
        assert_eq!(frames[1].frame_index, 1);
    }

    #[test]
    fn test_offset_seconds() {
        assert!((offset_seconds("1.250s") - 1.25).abs() < f64::EPSILON);
        assert!(offset_seconds("bogus").abs() < f64::EPSILON);
    }

    #[test]
    fn test_clip_name() {
        assert_eq!(clip_name("gs://bkt/videos/video_abc.mp4"), "video_abc");
        assert_eq!(clip_name("gs://bkt/clip"), "clip");
    }

    /// Fake API: creation returns a pending operation, each poll reports
    /// `done_after_polls` reached or not.
    async fn serve_operation(done_after_polls: usize) -> String {
        let polls = Arc::new(AtomicUsize::new(0));
        let app = axum::Router::new().fallback(move |method: Method| {
            let polls = Arc::clone(&polls);
            async move {
                if method == Method::POST {
                    return Json(json!({"name": "projects/p/operations/7"}));
                }
                if polls.fetch_add(1, Ordering::SeqCst) + 1 < done_after_polls {
                    return Json(json!({"name": "projects/p/operations/7", "done": false}));
                }
                Json(json!({
                    "name": "projects/p/operations/7",
                    "done": true,
                    "response": {"annotationResults": [{"personDetectionAnnotations": [{"tracks": [{
                        "timestampedObjects": [
                            {"timeOffset": "0.4s", "landmarks": [{"point": {"x": 0.3, "y": 0.7}, "confidence": 0.9}]},
                            {"timeOffset": "0s", "landmarks": [{"point": {"x": 0.2, "y": 0.6}, "confidence": 0.8}]}
                        ]
                    }]}]}]}
                }))
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn test_client(endpoint: &str) -> VideoIntelligenceClient {
        VideoIntelligenceClient::new(reqwest::Client::new(), "token".to_string(), Duration::from_millis(10))
            .with_endpoint(endpoint)
    }

    #[tokio::test]
    async fn test_annotate_to_table_writes_landmarks() {
        let endpoint = serve_operation(2).await;
        let out = tempfile::tempdir().unwrap();
        let client = test_client(&endpoint);
        let cancel = CancellationToken::new();

        let outcome = client
            .annotate_to_table("gs://bkt/videos/video_abc.mp4", out.path(), &cancel)
            .await
            .unwrap();

        let table = landmarks::table_path(out.path(), "video_abc");
        assert_eq!(outcome, FolderOutcome::Written { table: table.clone(), frames: 2 });
        let frames = landmarks::read_landmarks(&table).unwrap();
        assert_eq!(frames[0].frame, "0s");
        assert_eq!(frames[1].frame_index, 1);

        let again = client
            .annotate_to_table("gs://bkt/videos/video_abc.mp4", out.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(again, FolderOutcome::Skipped(table));
    }

    #[tokio::test]
    async fn test_annotate_stops_when_cancelled() {
        let endpoint = serve_operation(usize::MAX).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = test_client(&endpoint)
            .annotate("gs://bkt/videos/video_abc.mp4", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PoseError::Cancelled));
    }
}
