use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use plait_core::config::API_KEY_HEADER;

use crate::app::AppState;
use crate::error::ApiError;

/// Shared-key auth for every route except the health probe.
///
/// With an empty configured key the check is disabled; loopback peers
/// bypass it when `allow_localhost` is set.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path().ends_with("/health") {
        return Ok(next.run(request).await);
    }
    if state.config.api_key.is_empty() {
        return Ok(next.run(request).await);
    }
    if state.config.allow_localhost {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        if peer.map(|ip| ip.is_loopback()).unwrap_or(false) {
            return Ok(next.run(request).await);
        }
    }

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match presented {
        Some(key) if key == state.config.api_key => Ok(next.run(request).await),
        Some(_) => {
            warn!(path = %request.uri().path(), "rejected request with wrong API key");
            Err(ApiError::Auth("invalid API key".to_string()))
        }
        None => Err(ApiError::Auth(format!(
            "missing {API_KEY_HEADER} header"
        ))),
    }
}
