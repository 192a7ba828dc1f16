//! API route definitions

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/generate", post(handlers::generate_text))
        .route("/analyze_exercise", post(handlers::analyze_exercise))
        .route("/health", get(handlers::health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationParams, LlmBackend};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Echoes the prompt followed by a fixed answer, like a raw causal LM.
    struct EchoBackend {
        last: Mutex<Option<(String, GenerationParams)>>,
    }

    #[async_trait]
    impl LlmBackend for EchoBackend {
        async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
            *self.last.lock().unwrap() = Some((prompt.to_string(), *params));
            Ok(format!("{prompt}  Keep your knee over your ankle. "))
        }

        fn backend_name(&self) -> &'static str {
            "echo"
        }

        fn uses_gpu(&self) -> bool {
            false
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl LlmBackend for FailingBackend {
        async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
            anyhow::bail!("out of memory")
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }

        fn uses_gpu(&self) -> bool {
            false
        }
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_generate_strips_echoed_prompt() {
        let backend = Arc::new(EchoBackend {
            last: Mutex::new(None),
        });
        let app = api_routes(ApiState::new(backend.clone()));

        let response = app
            .oneshot(post_json("/generate", r#"{"prompt": "knee pain on stairs"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["generated_text"], "Keep your knee over your ankle.");

        let (prompt, params) = backend.last.lock().unwrap().clone().unwrap();
        assert!(prompt.ends_with("provide guidance on the following: knee pain on stairs"));
        assert_eq!(params.max_tokens, 256);
        assert!((params.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_analyze_exercise_shape_and_params() {
        let backend = Arc::new(EchoBackend {
            last: Mutex::new(None),
        });
        let app = api_routes(ApiState::new(backend.clone()));

        let response = app
            .oneshot(post_json(
                "/analyze_exercise",
                r#"{"prompt": "squat, knees cave in", "max_tokens": 64, "temperature": 0.2}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["analysis"], "Keep your knee over your ankle.");
        let (_, params) = backend.last.lock().unwrap().clone().unwrap();
        assert_eq!(params.max_tokens, 64);
    }

    #[tokio::test]
    async fn test_backend_error_is_500_with_detail() {
        let app = api_routes(ApiState::new(Arc::new(FailingBackend)));

        let response = app
            .clone()
            .oneshot(post_json("/generate", r#"{"prompt": "x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["detail"], "Generation error: out of memory");

        let response = app
            .oneshot(post_json("/analyze_exercise", r#"{"prompt": "x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["detail"], "Analysis error: out of memory");
    }

    #[tokio::test]
    async fn test_invalid_body_is_client_error() {
        let app = api_routes(ApiState::new(Arc::new(FailingBackend)));

        let response = app
            .oneshot(post_json("/generate", r#"{"text": "missing prompt"}"#))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let app = api_routes(ApiState::new(Arc::new(FailingBackend)));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["backend"], "failing");
    }
}
