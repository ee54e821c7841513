use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
}

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "sessions": state.manager.list() }))
}

/// POST /api/v1/sessions — 201 on success, 409 on id conflict.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionBody>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or(CreateSessionBody {
        session_id: None,
        cwd: None,
    });
    let info = state
        .manager
        .create(body.session_id, body.cwd.map(PathBuf::from))
        .await?;
    info!(session_id = %info.session_id, "session created via API");
    Ok((StatusCode::CREATED, Json(json!({ "session": info }))))
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let info = state.manager.info(&id)?;
    Ok(Json(json!({ "session": info })))
}

/// DELETE /api/v1/sessions/{id} — stop the kernel and drop the record.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.manager.stop(&id).await?;
    state.streams.remove_session(&id);
    Ok(Json(json!({ "stopped": id })))
}

#[derive(Debug, Deserialize)]
pub struct LoadPluginBody {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// POST /api/v1/sessions/{id}/plugins
pub async fn load_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<LoadPluginBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .manager
        .load_plugin(&id, &body.name, &body.code, body.config)
        .await?;
    Ok(Json(json!({ "loaded": body.name })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateVariablesBody {
    pub variables: Map<String, Value>,
}

/// POST /api/v1/sessions/{id}/variables
pub async fn update_variables(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateVariablesBody>,
) -> Result<Json<Value>, ApiError> {
    let count = body.variables.len();
    state.manager.update_variables(&id, body.variables).await?;
    Ok(Json(json!({ "updated": count })))
}
