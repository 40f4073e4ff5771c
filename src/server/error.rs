use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use uuid::Uuid;

use crate::error::VoxError;

/// Failure envelope returned by every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug)]
pub struct ApiError {
    message: String,
    kind: &'static str,
    status: Option<&'static str>,
    job_id: Option<Uuid>,
}

impl ApiError {
    /// Attach the job an execution failure belongs to.
    pub fn for_job(mut self, job_id: Uuid, status: &'static str) -> Self {
        self.job_id = Some(job_id);
        self.status = Some(status);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<VoxError> for ApiError {
    fn from(err: VoxError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
            status: None,
            job_id: None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            message: rejection.body_text(),
            kind: "bad_request",
            status: None,
            job_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = FailureBody {
            success: false,
            error: self.message,
            status: self.status,
            job_id: self.job_id,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
