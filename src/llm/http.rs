//! Backend that forwards to a llama.cpp-compatible HTTP server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{GenerationParams, LlmBackend};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: usize,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

pub struct HttpCompletionBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCompletionBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/completion", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LlmBackend for HttpCompletionBackend {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        tracing::debug!(
            endpoint = %self.endpoint,
            prompt_length = prompt.len(),
            max_tokens = params.max_tokens,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&CompletionRequest {
                prompt,
                n_predict: params.max_tokens,
                temperature: params.temperature,
                stream: false,
            })
            .send()
            .await
            .context("Completion server unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion server returned {status}: {body}");
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Invalid completion response")?;
        Ok(completion.content)
    }

    fn backend_name(&self) -> &'static str {
        "llama.cpp HTTP"
    }

    fn uses_gpu(&self) -> bool {
        false
    }
}
