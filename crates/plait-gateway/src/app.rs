use std::sync::Arc;

use axum::{routing::get, Json, Router};
use dashmap::DashMap;
use serde_json::{json, Value};

use plait_agent::{AgentSession, OrchestratorError};

/// Builds an [`AgentSession`] for a connection's session id. The factory
/// is where the embedding application wires in its LLM adapter,
/// execution client, and summarizer.
pub trait SessionFactory: Send + Sync {
    fn build(&self, session_id: &str) -> Result<Arc<AgentSession>, OrchestratorError>;
}

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub factory: Arc<dyn SessionFactory>,
    /// Live sessions keyed by id; connections share a session.
    pub sessions: DashMap<String, Arc<AgentSession>>,
}

impl AppState {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            sessions: DashMap::new(),
        }
    }

    /// Existing session or a freshly-built one for unknown ids.
    pub fn session(&self, session_id: &str) -> Result<Arc<AgentSession>, OrchestratorError> {
        if let Some(session) = self.sessions.get(session_id) {
            return Ok(Arc::clone(&session));
        }
        let session = self.factory.build(session_id)?;
        self.sessions
            .insert(session_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Tear down and forget a session.
    pub fn remove_session(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.shutdown();
        }
    }
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
    }))
}

/// Assemble the gateway router: one duplex connection per session id.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/{session_id}", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
