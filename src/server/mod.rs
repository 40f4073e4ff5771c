//! HTTP gateway for the browser front-end.
//!
//! Three JSON endpoints share one envelope: `{success: true, ...}` on
//! success, `{success: false, error}` with status 500 on any failure.

mod error;
pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::types::{ServerConfig, VoxConfig};
use crate::error::Result;
use crate::generator::CodeGenerator;
use crate::providers::create_provider;
use crate::sandbox::Sandbox;

pub use error::{ApiError, FailureBody};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<CodeGenerator>,
    pub sandbox: Arc<Sandbox>,
}

impl AppState {
    pub fn new(generator: CodeGenerator, sandbox: Sandbox) -> Self {
        Self {
            generator: Arc::new(generator),
            sandbox: Arc::new(sandbox),
        }
    }

    /// Build the provider and the sandbox from configuration.
    pub async fn from_config(config: &VoxConfig) -> Result<Self> {
        let provider = create_provider(
            &config.generator.provider,
            config.generator.model.as_deref(),
            config,
        )?;
        info!(
            provider = provider.name(),
            model = provider.model(),
            "Completion provider ready"
        );

        let generator = CodeGenerator::new(provider, &config.generator);
        let sandbox = Sandbox::from_config(&config.sandbox).await?;
        Ok(Self::new(generator, sandbox))
    }
}

pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let app = Router::new()
        .route("/api/voice-to-text", post(handlers::voice_to_text))
        .route("/api/text-to-code", post(handlers::text_to_code))
        .route("/api/execute-code", post(handlers::execute_code))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        addr = %listener.local_addr()?,
        backend = state.sandbox.backend_name(),
        "Server listening"
    );

    axum::serve(listener, router(state, config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{BackendType, InterpreterConfig, LimitsConfig, SandboxConfig};
    use crate::generator::test_support::ScriptedProvider;
    use crate::sandbox::ProcessBackend;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        provider: Arc<ScriptedProvider>,
        _root: tempfile::TempDir,
    }

    fn harness(reply: &str) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::replying(reply));
        let generator = CodeGenerator::new(provider.clone(), &Default::default());

        let sandbox_config = SandboxConfig {
            backend: BackendType::Process,
            interpreter: InterpreterConfig {
                program: "sh".to_string(),
                args: vec![],
                source_file: "main.sh".to_string(),
                ..Default::default()
            },
            limits: LimitsConfig {
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                cpu_seconds: None,
                memory_mb: None,
                max_processes: None,
                max_file_bytes: None,
            },
            work_root: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        let sandbox = Sandbox::new(Arc::new(ProcessBackend::new()), &sandbox_config);

        let app = router(
            AppState::new(generator, sandbox),
            &ServerConfig::default(),
        );
        Harness {
            app,
            provider,
            _root: root,
        }
    }

    async fn post(app: &Router, uri: &str, body: Body) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        post(app, uri, Body::from(body.to_string())).await
    }

    #[tokio::test]
    async fn test_voice_echoes_input() {
        let h = harness("");
        let (status, body) =
            post_json(&h.app, "/api/voice-to-text", json!({"voiceInput": "print hello"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["transcribedText"], "print hello");
        assert_eq!(body["message"], "Voice successfully transcribed");
    }

    #[tokio::test]
    async fn test_voice_missing_input() {
        let h = harness("");
        for payload in [json!({}), json!({"voiceInput": ""})] {
            let (status, body) = post_json(&h.app, "/api/voice-to-text", payload).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "No voice input provided");
        }
    }

    #[tokio::test]
    async fn test_text_to_code() {
        let h = harness("```python\nprint(2 + 3)\n```");
        let (status, body) = post_json(
            &h.app,
            "/api/text-to-code",
            json!({"text": "add two numbers and print the result"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["code"], "print(2 + 3)");
        assert_eq!(body["language"], "python");
        assert_eq!(body["message"], "Code generated successfully");
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_text_to_code_empty_never_calls_provider() {
        let h = harness("print(1)");
        let (status, body) = post_json(&h.app, "/api/text-to-code", json!({"text": "  "})).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "No text input provided");
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_code() {
        let h = harness("");
        let (status, body) = post_json(
            &h.app,
            "/api/execute-code",
            json!({"code": "echo out\necho note >&2"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["output"], "out\n");
        assert_eq!(body["stderr"], "note\n");
        assert_eq!(body["exitCode"], 0);
        assert_eq!(body["truncated"], false);
        assert_eq!(body["message"], "Code executed successfully");
        assert!(body["jobId"].is_string());
    }

    #[tokio::test]
    async fn test_execute_timeout_message() {
        let h = harness("");
        let (status, body) = post_json(
            &h.app,
            "/api/execute-code",
            json!({"code": "sleep 10", "timeoutMs": 1000}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Execution timed out (max 1 second)");
        assert_eq!(body["status"], "timed_out");
        assert!(body["jobId"].is_string());
    }

    #[tokio::test]
    async fn test_execute_failures() {
        let h = harness("");

        let (_, body) = post_json(&h.app, "/api/execute-code", json!({"code": ""})).await;
        assert_eq!(body["error"], "No code provided");

        let (status, body) =
            post_json(&h.app, "/api/execute-code", json!({"code": "echo bad >&2; exit 1"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "runtime_error");
        assert_eq!(body["error"], "Execution failed: bad");

        let (_, body) = post_json(
            &h.app,
            "/api/execute-code",
            json!({"code": "echo hi", "timeoutMs": 600000}),
        )
        .await;
        assert_eq!(body["status"], "rejected");
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Security restriction:"));
    }

    #[tokio::test]
    async fn test_malformed_json_uses_envelope() {
        let h = harness("");
        let (status, body) = post(&h.app, "/api/execute-code", Body::from("{not json")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness("");
        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "process");
    }
}
