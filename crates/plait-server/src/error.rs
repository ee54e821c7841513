use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

use plait_kernel::{KernelError, ManagerError};

/// HTTP-facing error with a stable status mapping:
/// 401 auth, 404 missing, 409 conflict, 400 malformed, 500 unexpected.
/// Kernel-level execution failures never reach this type; they are 200
/// bodies with `is_success = false`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Auth(String),

    #[error("{detail}")]
    NotFound { code: &'static str, detail: String },

    #[error("{detail}")]
    Conflict { code: &'static str, detail: String },

    #[error("{detail}")]
    BadRequest { code: &'static str, detail: String },

    #[error("{detail}")]
    Internal { code: &'static str, detail: String },
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code: "BAD_REQUEST",
            detail: detail.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(_) => "AUTH_REQUIRED",
            ApiError::NotFound { code, .. }
            | ApiError::Conflict { code, .. }
            | ApiError::BadRequest { code, .. }
            | ApiError::Internal { code, .. } => code,
        }
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        let code = err.code();
        match err {
            ManagerError::SessionExists(id) => ApiError::Conflict {
                code: "SESSION_EXISTS",
                detail: format!("session already exists: {id}"),
            },
            ManagerError::SessionNotFound(id) => ApiError::NotFound {
                code: "SESSION_NOT_FOUND",
                detail: format!("session not found: {id}"),
            },
            ManagerError::Kernel(e) => match e {
                KernelError::PathTraversal(path) => ApiError::BadRequest {
                    code: "PATH_TRAVERSAL",
                    detail: format!("path escapes session working directory: {path}"),
                },
                KernelError::ArtifactNotFound(name) => ApiError::NotFound {
                    code: "ARTIFACT_NOT_FOUND",
                    detail: format!("artifact not found: {name}"),
                },
                KernelError::PluginLoadFailed { name, reason } => ApiError::BadRequest {
                    code: "PLUGIN_LOAD_FAILED",
                    detail: format!("plugin '{name}' failed to load: {reason}"),
                },
                other => ApiError::Internal {
                    code,
                    detail: other.to_string(),
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "detail": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}
