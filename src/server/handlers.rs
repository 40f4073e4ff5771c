use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::VoxError;
use crate::generator::GenerationRequest;
use crate::server::error::ApiError;
use crate::server::AppState;

/// Message returned when a transcription request has no input.
pub const EMPTY_VOICE_MESSAGE: &str = "No voice input provided";

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Unwrap a JSON body, turning malformed input into the failure envelope.
fn body<T>(
    payload: std::result::Result<Json<T>, JsonRejection>,
    route: &str,
) -> std::result::Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            warn!(route = route, error = %rejection.body_text(), "Malformed request body");
            Err(ApiError::from(rejection))
        }
    }
}

fn log_failure(route: &str, err: &ApiError) {
    warn!(route = route, kind = err.kind(), error = %err.message(), "Request failed");
}

// ============================================================================
// Voice to text
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceRequest {
    #[serde(default)]
    pub voice_input: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceResponse {
    pub success: bool,
    pub transcribed_text: String,
    pub message: &'static str,
}

/// Echo endpoint standing in for a speech recognizer: the input is returned
/// unchanged.
pub async fn voice_to_text(
    payload: std::result::Result<Json<VoiceRequest>, JsonRejection>,
) -> ApiResult<VoiceResponse> {
    let request = body(payload, "voice-to-text")?;

    let transcribed_text = match request.voice_input {
        Some(input) if !input.is_empty() => input,
        _ => {
            let err = ApiError::from(VoxError::EmptyInput(EMPTY_VOICE_MESSAGE.to_string()));
            log_failure("voice-to-text", &err);
            return Err(err);
        }
    };

    Ok(Json(VoiceResponse {
        success: true,
        transcribed_text,
        message: "Voice successfully transcribed",
    }))
}

// ============================================================================
// Text to code
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CodeGenRequest {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CodeGenResponse {
    pub success: bool,
    pub code: String,
    pub language: &'static str,
    pub message: &'static str,
}

pub async fn text_to_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CodeGenRequest>, JsonRejection>,
) -> ApiResult<CodeGenResponse> {
    let request = body(payload, "text-to-code")?;
    let text = request.text.unwrap_or_default();

    let result = match state.generator.generate(&GenerationRequest::new(text)).await {
        Ok(result) => result,
        Err(e) => {
            if e.is_upstream() {
                error!(
                    provider = state.generator.provider_name(),
                    error = %e,
                    "Code generation provider failed"
                );
            }
            let err = ApiError::from(e);
            log_failure("text-to-code", &err);
            return Err(err);
        }
    };

    info!(
        model = %result.model,
        source = ?result.source,
        code_len = result.code.len(),
        "Code generated"
    );

    Ok(Json(CodeGenResponse {
        success: true,
        code: result.code,
        language: result.language.name(),
        message: "Code generated successfully",
    }))
}

// ============================================================================
// Execute code
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: Option<String>,
    /// Wall-clock budget override
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Output ceiling override, per stream
    #[serde(default)]
    pub max_output_bytes: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    /// Captured stdout
    pub output: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub truncated: bool,
    pub job_id: Uuid,
    pub message: &'static str,
}

pub async fn execute_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<ExecuteResponse> {
    let request = body(payload, "execute-code")?;
    let code = request.code.unwrap_or_default();

    let limits = state
        .sandbox
        .default_limits()
        .clone()
        .overridden(request.timeout_ms, request.max_output_bytes);

    let result = match state.sandbox.submit(&code, limits).await {
        Ok(result) => result,
        Err(e) => {
            let err = ApiError::from(e);
            log_failure("execute-code", &err);
            return Err(err);
        }
    };

    if let Some(failure) = result.failure() {
        let err = ApiError::from(failure).for_job(result.job_id, result.status.label());
        log_failure("execute-code", &err);
        return Err(err);
    }

    Ok(Json(ExecuteResponse {
        success: true,
        truncated: result.truncated(),
        duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
        output: result.stdout,
        stderr: result.stderr,
        exit_code: result.exit_code,
        job_id: result.job_id,
        message: "Code executed successfully",
    }))
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// RFC 3339
    pub timestamp: String,
    pub version: &'static str,
    pub backend: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        backend: state.sandbox.backend_name().to_string(),
    })
}
