//! Cloud Storage through the JSON API.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::info;

use super::{io_err, CloudError, ObjectStore};

const API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

pub struct GcsStore {
    http: reqwest::Client,
    token: String,
    project_id: String,
    region: String,
    bucket: String,
}

/// Turn a non-2xx response into [`CloudError::Api`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::Api {
        status: status.as_u16(),
        body,
    })
}

impl GcsStore {
    pub fn new(
        http: reqwest::Client,
        token: String,
        project_id: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token,
            project_id: project_id.into(),
            region: region.into(),
            bucket: bucket.into(),
        }
    }

    /// `<base>/b/<bucket>/o[/<name>]` with every segment percent-encoded.
    fn object_url(&self, base: &str, name: Option<&str>) -> Result<Url, CloudError> {
        let mut url = Url::parse(base).map_err(|e| CloudError::Url(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| CloudError::Url(format!("{base} cannot be a base URL")))?;
            segments.push("b").push(&self.bucket).push("o");
            if let Some(name) = name {
                segments.push(name);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<(), CloudError> {
        let response = self
            .http
            .get(format!("{API_BASE}/b/{}", self.bucket))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() != StatusCode::NOT_FOUND {
            check(response).await?;
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{API_BASE}/b"))
            .query(&[("project", self.project_id.as_str())])
            .bearer_auth(&self.token)
            .json(&json!({ "name": self.bucket, "location": self.region }))
            .send()
            .await?;
        check(response).await?;
        info!(bucket = %self.bucket, region = %self.region, "Created bucket");
        Ok(())
    }

    async fn upload_file(&self, local: &Path, name: &str) -> Result<(), CloudError> {
        let bytes = tokio::fs::read(local).await.map_err(io_err(local))?;
        let response = self
            .http
            .post(format!("{UPLOAD_BASE}/b/{}/o", self.bucket))
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CloudError> {
        let url = self.object_url(API_BASE, None)?;
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .query(&[("prefix", prefix)])
                .bearer_auth(&self.token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: ObjectList = check(request.send().await?).await?.json().await?;
            names.extend(page.items.into_iter().map(|i| i.name));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<(), CloudError> {
        let url = self.object_url(API_BASE, Some(name))?;
        let response = self
            .http
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(self.uri(name)));
        }
        let bytes = check(response).await?.bytes().await?;
        tokio::fs::write(dest, &bytes).await.map_err(io_err(dest))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_encodes_slashes() {
        let store = GcsStore::new(reqwest::Client::new(), String::new(), "p", "us-central1", "bkt");
        let url = store
            .object_url(API_BASE, Some("models/a b.tflite"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bkt/o/models%2Fa%20b.tflite"
        );
    }
}
