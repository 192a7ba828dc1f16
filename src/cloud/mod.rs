//! Cloud Storage and Managed Training
//!
//! - [`ObjectStore`]: bucket operations, with a Cloud Storage implementation
//!   ([`GcsStore`]) and a filesystem one ([`LocalStore`]) for offline runs
//! - [`VertexClient`]: submits and waits on custom training jobs
//! - [`package_trainer`]: builds the trainer source distribution

mod auth;
mod gcs;
mod local;
mod package;
mod vertex;

pub use auth::{access_token, TOKEN_ENV};
pub use gcs::GcsStore;
pub use local::LocalStore;
pub use package::{package_trainer, PACKAGE_FILE};
pub use vertex::{JobSpec, JobState, VertexClient};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Cloud API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Invalid URL: {0}")]
    Url(String),
    #[error("No access token: {0}")]
    Auth(String),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Training job {name} ended in state {state:?}")]
    JobFailed { name: String, state: JobState },
    #[error("Training job wait cancelled")]
    Cancelled,
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CloudError + '_ {
    move |source| CloudError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Flat-namespace object storage addressed by `/`-separated names.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Create the bucket if it does not exist.
    async fn ensure_bucket(&self) -> Result<(), CloudError>;

    async fn upload_file(&self, local: &Path, name: &str) -> Result<(), CloudError>;

    /// Object names starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, CloudError>;

    async fn download(&self, name: &str, dest: &Path) -> Result<(), CloudError>;

    /// `gs://<bucket>/<name>`
    fn uri(&self, name: &str) -> String {
        format!("gs://{}/{}", self.bucket(), name.trim_start_matches('/'))
    }
}

/// Files under `dir`, recursively, sorted.
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>, CloudError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).map_err(io_err(&current))? {
            let path = entry.map_err(io_err(&current))?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Object name for `file` under `local_root`, with forward slashes.
fn object_name(prefix: &str, local_root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(local_root).unwrap_or(file);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        parts.join("/")
    } else {
        format!("{prefix}/{}", parts.join("/"))
    }
}

/// Upload a file or a whole directory tree under `prefix`.
///
/// A single file is stored as the object `prefix` itself. Returns
/// `gs://<bucket>/<prefix>`.
pub async fn upload_dir(store: &dyn ObjectStore, local: &Path, prefix: &str) -> Result<String, CloudError> {
    let files = if local.is_dir() {
        let files = walk_files(local)?;
        for file in &files {
            let name = object_name(prefix, local, file);
            debug!(file = %file.display(), object = %name, "Uploading");
            store.upload_file(file, &name).await?;
        }
        files
    } else {
        store.upload_file(local, prefix.trim_end_matches('/')).await?;
        vec![local.to_path_buf()]
    };

    let uri = store.uri(prefix.trim_end_matches('/'));
    info!(files = files.len(), uri = %uri, "Uploaded {}", local.display());
    Ok(uri)
}

/// Mirror every object under `prefix` into `dest`, keeping relative paths.
///
/// Returns the local files written.
pub async fn download_prefix(store: &dyn ObjectStore, prefix: &str, dest: &Path) -> Result<Vec<PathBuf>, CloudError> {
    let prefix = prefix.trim_end_matches('/');
    let mut written = Vec::new();

    for name in store.list(prefix).await? {
        let relative = name
            .strip_prefix(prefix)
            .unwrap_or(&name)
            .trim_start_matches('/');
        if relative.is_empty() || relative.ends_with('/') {
            continue;
        }
        let target = relative.split('/').fold(dest.to_path_buf(), |p, part| p.join(part));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        store.download(&name, &target).await?;
        written.push(target);
    }

    info!(files = written.len(), dest = %dest.display(), "Downloaded gs://{}/{}", store.bucket(), prefix);
    Ok(written)
}

/// Strip `gs://<bucket>/` from a URI, leaving the object name.
pub fn object_path<'a>(uri: &'a str, bucket: &str) -> &'a str {
    uri.strip_prefix("gs://")
        .and_then(|rest| rest.strip_prefix(bucket))
        .map_or(uri, |rest| rest.trim_start_matches('/'))
}
