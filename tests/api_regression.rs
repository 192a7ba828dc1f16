//! API Regression Tests
//!
//! In-process tests that build the full Axum app via `create_app()` (with its
//! trace, CORS and body-limit layers) and exercise every endpoint using
//! `tower::ServiceExt::oneshot()`. No network port, no model download.

use physioflow::api::{create_app, ApiState};
use physioflow::llm::{GenerationParams, LlmBackend};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

/// Returns a canned answer without echoing the prompt.
struct CannedBackend(&'static str);

#[async_trait]
impl LlmBackend for CannedBackend {
    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }

    fn backend_name(&self) -> &'static str {
        "canned"
    }

    fn uses_gpu(&self) -> bool {
        false
    }
}

fn app(answer: &'static str) -> axum::Router {
    create_app(ApiState::new(Arc::new(CannedBackend(answer))))
}

fn post(uri: &str, body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn generate_returns_generated_text_field() {
    let response = app("\n Do 3 sets of 10 wall sits.\n")
        .oneshot(post("/generate", r#"{"prompt": "quad strengthening"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["generated_text"], "Do 3 sets of 10 wall sits.");
    assert_eq!(body.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn analyze_exercise_returns_analysis_field() {
    let response = app("Knees track inward; cue hip abduction.")
        .oneshot(post(
            "/analyze_exercise",
            r#"{"prompt": "Bodyweight squat, knees collapse at the bottom"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["analysis"], "Knees track inward; cue hip abduction.");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let response = app("unused")
        .oneshot(post("/generate", "{not json"))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let body = format!(r#"{{"prompt": "{}"}}"#, "a".repeat(128 * 1024));
    let request = Request::builder()
        .method("POST")
        .uri("/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let response = app("unused").oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn health_endpoint_returns_200() {
    let response = app("unused")
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["uses_gpu"], false);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let response = app("unused")
        .oneshot(Request::builder().uri("/predict").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
