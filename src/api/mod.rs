use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::inference::InferenceService;

pub mod error;
pub mod handlers;
pub mod types;

use handlers::{chat, health};

#[derive(Clone)]
pub struct AppState {
    pub infer: Arc<InferenceService>,
    pub model_id: String,
    pub device: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // POST /chat
        .route("/chat", post(chat))
        // GET /health
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{build_prompt, GenerationConfig, TextGenerator};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Scripted {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                return Err(anyhow!("CUDA out of memory"));
            }
            Ok("Refunds are issued within 14 days.".into())
        }
    }

    fn app(generator: Arc<Scripted>) -> Router {
        router(AppState {
            infer: Arc::new(InferenceService::new(generator, GenerationConfig::default())),
            model_id: "test-model".into(),
            device: "cpu".into(),
        })
    }

    fn json_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(resp: axum::response::Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_generated_text() {
        let generator = Arc::new(Scripted::default());
        let body = json!({ "message": "What is your refund policy?" }).to_string();

        let resp = app(generator.clone()).oneshot(json_request(&body)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = read_json(resp).await;
        assert!(!json["response"].as_str().unwrap().is_empty());
        assert_eq!(
            generator.prompts.lock().unwrap().as_slice(),
            [build_prompt("What is your refund policy?")]
        );
    }

    #[tokio::test]
    async fn missing_message_is_treated_as_empty() {
        let generator = Arc::new(Scripted::default());

        let resp = app(generator.clone()).oneshot(json_request("{}")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            generator.prompts.lock().unwrap().as_slice(),
            [build_prompt("")]
        );
    }

    #[tokio::test]
    async fn null_message_is_treated_as_empty() {
        let generator = Arc::new(Scripted::default());

        let resp = app(generator.clone())
            .oneshot(json_request(r#"{"message": null}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            generator.prompts.lock().unwrap().as_slice(),
            [build_prompt("")]
        );
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_by_the_framework() {
        let generator = Arc::new(Scripted::default());

        let resp = app(generator.clone())
            .oneshot(json_request("{not json"))
            .await
            .unwrap();

        assert!(resp.status().is_client_error());
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_is_a_structured_500() {
        let generator = Arc::new(Scripted {
            fail: true,
            ..Default::default()
        });

        let resp = app(generator)
            .oneshot(json_request(r#"{"message": "hi"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = read_json(resp).await;
        assert_eq!(json["error"]["type"], "generation_error");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn health_reports_model_and_device() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app(Arc::new(Scripted::default())).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = read_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["device"], "cpu");
    }
}
