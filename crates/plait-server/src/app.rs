use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};

use plait_core::config::ExecServerConfig;
use plait_kernel::SessionManager;

use crate::stream::StreamRegistry;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ExecServerConfig,
    pub manager: Arc<SessionManager>,
    pub streams: StreamRegistry,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ExecServerConfig, manager: Arc<SessionManager>) -> Self {
        Self {
            config,
            manager,
            streams: StreamRegistry::new(),
            started_at: Utc::now(),
        }
    }
}

/// Assemble the full Axum router for the `/api/v1` surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/sessions",
            get(crate::http::sessions::list_sessions).post(crate::http::sessions::create_session),
        )
        .route(
            "/sessions/{id}",
            get(crate::http::sessions::get_session).delete(crate::http::sessions::delete_session),
        )
        .route(
            "/sessions/{id}/plugins",
            post(crate::http::sessions::load_plugin),
        )
        .route(
            "/sessions/{id}/execute",
            post(crate::http::execute::execute_handler),
        )
        .route(
            "/sessions/{id}/execute/{exec_id}/stream",
            get(crate::http::execute::stream_handler),
        )
        .route(
            "/sessions/{id}/variables",
            post(crate::http::sessions::update_variables),
        )
        .route("/sessions/{id}/files", post(crate::http::files::upload_file))
        .route(
            "/sessions/{id}/artifacts/{filename}",
            get(crate::http::files::download_artifact),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            crate::auth::require_api_key,
        ));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
