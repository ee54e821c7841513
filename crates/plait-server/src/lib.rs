//! The execution server: a multi-session code-execution backend exposed
//! as JSON + server-sent events under `/api/v1`.

pub mod app;
pub mod auth;
pub mod error;
pub mod http;
pub mod stream;

pub use app::{build_router, AppState};
