use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadEncoding {
    Base64,
    #[default]
    Text,
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub encoding: UploadEncoding,
}

/// POST /api/v1/sessions/{id}/files — write to the session cwd.
/// Uploading the same name twice overwrites; traversal attempts are 400.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UploadBody>,
) -> Result<Json<Value>, ApiError> {
    let bytes = match body.encoding {
        UploadEncoding::Text => body.content.into_bytes(),
        UploadEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(body.content.trim())
            .map_err(|e| ApiError::bad_request(format!("invalid base64 content: {e}")))?,
    };
    let written = state.manager.upload_file(&id, &body.filename, &bytes).await?;
    Ok(Json(json!({
        "filename": body.filename,
        "size": bytes.len(),
        "path": written.display().to_string(),
    })))
}

/// GET /api/v1/sessions/{id}/artifacts/{filename} — 404 on miss.
///
/// Only files resolving under the requesting session's own cwd are
/// served; there is no cross-session fallback.
pub async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.manager.artifact_path(&id, &filename)?;
    let bytes = tokio::fs::read(&path).await.map_err(|_| ApiError::NotFound {
        code: "ARTIFACT_NOT_FOUND",
        detail: format!("artifact not found: {filename}"),
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type_for(&filename))],
        bytes,
    ))
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("txt") | Some("log") => "text/plain",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}
