//! LLM Backend Module
//!
//! One trait, two backends:
//!
//! - **HttpCompletionBackend** (default): forwards to a llama.cpp-compatible
//!   `/completion` server
//! - **MistralRsBackend** (`llm` feature): in-process GGUF inference, on GPU
//!   when built with `cuda` and a device is present

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

mod http;
#[cfg(feature = "llm")]
mod mistral_rs;
pub mod prompts;

pub use http::HttpCompletionBackend;
#[cfg(feature = "llm")]
pub use mistral_rs::{is_cuda_available, MistralRsBackend};

use crate::config::{defaults, BackendKind, ServerConfig};

/// Sampling options for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: defaults::MAX_TOKENS,
            temperature: defaults::TEMPERATURE,
        }
    }
}

/// Unified trait for LLM backends
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Get the backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Check if this backend uses GPU
    fn uses_gpu(&self) -> bool;
}

/// Build the backend selected in the server settings.
///
/// # Errors
///
/// Returns an error if the model cannot be loaded or the backend is not
/// compiled in.
pub async fn create_backend(server: &ServerConfig) -> Result<Arc<dyn LlmBackend>> {
    let timeout = Duration::from_secs(server.generation_timeout_secs);
    match server.backend {
        BackendKind::Http => {
            tracing::info!(url = %server.backend_url, "Using HTTP completion backend");
            Ok(Arc::new(HttpCompletionBackend::new(&server.backend_url, timeout)?))
        }
        #[cfg(feature = "llm")]
        BackendKind::MistralRs => {
            tracing::info!(model_path = %server.model_path, "Attempting to load Mistral.rs backend");
            let backend = MistralRsBackend::load(&server.model_path, timeout).await?;
            tracing::info!(
                backend = backend.backend_name(),
                uses_gpu = backend.uses_gpu(),
                "Mistral.rs backend loaded successfully"
            );
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "llm"))]
        BackendKind::MistralRs => {
            anyhow::bail!("mistralrs backend requested but this binary was built without the `llm` feature")
        }
    }
}
