//! Custom training jobs on Vertex AI.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CloudError;
use crate::config::CloudConfig;

/// Lifecycle state reported for a custom job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "JOB_STATE_QUEUED")]
    Queued,
    #[serde(rename = "JOB_STATE_PENDING")]
    Pending,
    #[serde(rename = "JOB_STATE_RUNNING")]
    Running,
    #[serde(rename = "JOB_STATE_SUCCEEDED")]
    Succeeded,
    #[serde(rename = "JOB_STATE_FAILED")]
    Failed,
    #[serde(rename = "JOB_STATE_CANCELLING")]
    Cancelling,
    #[serde(rename = "JOB_STATE_CANCELLED")]
    Cancelled,
    #[serde(rename = "JOB_STATE_PAUSED")]
    Paused,
    #[serde(rename = "JOB_STATE_EXPIRED")]
    Expired,
    #[serde(rename = "JOB_STATE_UPDATING")]
    Updating,
    #[serde(rename = "JOB_STATE_PARTIALLY_SUCCEEDED")]
    PartiallySucceeded,
    #[serde(rename = "JOB_STATE_UNSPECIFIED")]
    Unspecified,
    /// A state this client does not know; ends the wait as a failure.
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Cancelled
                | Self::Expired
                | Self::PartiallySucceeded
                | Self::Unknown
        )
    }
}

/// Consecutive failed polls tolerated before `wait` gives up.
const MAX_POLL_FAILURES: u32 = 3;

/// Network errors and 429/5xx responses are worth another poll.
fn is_transient(err: &CloudError) -> bool {
    match err {
        CloudError::Http(e) => !e.is_decode(),
        CloudError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct CustomJob {
    name: String,
    #[serde(default = "unspecified")]
    state: JobState,
    #[serde(default)]
    error: Option<Value>,
}

fn unspecified() -> JobState {
    JobState::Unspecified
}

/// One python-package training job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub display_name: String,
    pub package_uris: Vec<String>,
    pub args: Vec<String>,
}

impl JobSpec {
    /// Standard PhysioFlow run: `physioflow_training_<unix>` with config,
    /// data and output locations as trainer arguments.
    pub fn physioflow(unix: u64, package_uri: String, config_uri: &str, data_uri: &str, bucket: &str) -> Self {
        Self {
            display_name: format!("physioflow_training_{unix}"),
            package_uris: vec![package_uri],
            args: vec![
                format!("--config={config_uri}"),
                format!("--data-dir={data_uri}"),
                format!("--output-dir=gs://{bucket}/models"),
            ],
        }
    }

    /// REST body for `customJobs.create`.
    pub fn to_request(&self, cloud: &CloudConfig) -> Value {
        json!({
            "displayName": self.display_name,
            "jobSpec": {
                "workerPoolSpecs": [{
                    "machineSpec": {
                        "machineType": cloud.machine_type,
                        "acceleratorType": cloud.accelerator_type,
                        "acceleratorCount": cloud.accelerator_count
                    },
                    "replicaCount": "1",
                    "pythonPackageSpec": {
                        "executorImageUri": cloud.executor_image,
                        "packageUris": self.package_uris,
                        "pythonModule": cloud.python_module,
                        "args": self.args
                    }
                }]
            }
        })
    }
}

pub struct VertexClient {
    http: reqwest::Client,
    token: String,
    endpoint: String,
    poll_interval: Duration,
    cloud: CloudConfig,
}

impl VertexClient {
    pub fn new(http: reqwest::Client, token: String, cloud: CloudConfig) -> Self {
        Self {
            http,
            token,
            endpoint: format!("https://{}-aiplatform.googleapis.com/v1", cloud.region),
            poll_interval: Duration::from_secs(cloud.poll_interval_secs.max(1)),
            cloud,
        }
    }

    /// Use another API root, e.g. a regional proxy.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<CustomJob, CloudError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// Create the job; returns its resource name.
    pub async fn submit(&self, spec: &JobSpec) -> Result<String, CloudError> {
        let url = format!(
            "{}/projects/{}/locations/{}/customJobs",
            self.endpoint(),
            self.cloud.project_id,
            self.cloud.region
        );
        let job = self
            .fetch(self.http.post(url).json(&spec.to_request(&self.cloud)))
            .await?;
        info!(job = %job.name, display_name = %spec.display_name, "Started training job");
        Ok(job.name)
    }

    /// Poll until the job reaches a terminal state. Anything but success is an error.
    ///
    /// Up to `MAX_POLL_FAILURES` transient errors in a row are retried.
    pub async fn wait(&self, name: &str, cancel: &CancellationToken) -> Result<(), CloudError> {
        let mut failures = 0;
        loop {
            match self
                .fetch(self.http.get(format!("{}/{name}", self.endpoint())))
                .await
            {
                Ok(job) => {
                    failures = 0;
                    debug!(job = %name, state = ?job.state, "Polled training job");
                    if job.state.is_terminal() {
                        return finish(name, job);
                    }
                }
                Err(e) if is_transient(&e) && failures + 1 < MAX_POLL_FAILURES => {
                    failures += 1;
                    warn!(job = %name, error = %e, failures, "Training job poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(CloudError::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Submit and wait.
    pub async fn run(&self, spec: &JobSpec, cancel: &CancellationToken) -> Result<(), CloudError> {
        let name = self.submit(spec).await?;
        self.wait(&name, cancel).await
    }
}

fn finish(name: &str, job: CustomJob) -> Result<(), CloudError> {
    if job.state == JobState::Succeeded {
        info!(job = %name, "Training job completed successfully");
        return Ok(());
    }
    if let Some(error) = job.error {
        debug!(job = %name, %error, "Training job error detail");
    }
    Err(CloudError::JobFailed {
        name: name.to_string(),
        state: job.state,
    })
}
