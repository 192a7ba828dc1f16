//! API request handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::defaults;
use crate::llm::{prompts, GenerationParams, LlmBackend};

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub backend: Arc<dyn LlmBackend>,
}

impl ApiState {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TextRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_tokens() -> usize {
    defaults::MAX_TOKENS
}
fn default_temperature() -> f64 {
    defaults::TEMPERATURE
}

impl TextRequest {
    fn params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub generated_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub analysis: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub uses_gpu: bool,
}

/// Error body: `{"detail": "..."}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Handler failure rendered as a status code plus [`ErrorDetail`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn internal(detail: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorDetail { detail: self.detail })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /generate`
pub async fn generate_text(
    State(state): State<ApiState>,
    Json(request): Json<TextRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let prompt = prompts::guidance_prompt(&request.prompt);
    let text = state
        .backend
        .generate(&prompt, &request.params())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Generation failed");
            ApiError::internal(format!("Generation error: {e}"))
        })?;

    Ok(Json(GenerateResponse {
        generated_text: prompts::strip_prompt(&text, &prompt),
    }))
}

/// `POST /analyze_exercise`
pub async fn analyze_exercise(
    State(state): State<ApiState>,
    Json(request): Json<TextRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let prompt = prompts::analysis_prompt(&request.prompt);
    let text = state
        .backend
        .generate(&prompt, &request.params())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Analysis failed");
            ApiError::internal(format!("Analysis error: {e}"))
        })?;

    Ok(Json(AnalysisResponse {
        analysis: prompts::strip_prompt(&text, &prompt),
    }))
}

/// `GET /health`
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.backend.backend_name().to_string(),
        uses_gpu: state.backend.uses_gpu(),
    })
}
