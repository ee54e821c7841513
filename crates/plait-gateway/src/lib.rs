//! Web gateway: projects a session's event bus onto a persistent duplex
//! WebSocket connection. History replays on connect, live events forward
//! while a turn runs, and inbound frames carry messages, confirmations,
//! and uploads.
//!
//! This crate is a library: the embedding application supplies the
//! [`SessionFactory`] (and with it the LLM adapter) and mounts
//! [`build_router`] wherever it serves HTTP.
//!
//! [`SessionFactory`]: app::SessionFactory
//! [`build_router`]: app::build_router

pub mod app;
pub mod ws;

pub use app::{build_router, AppState, SessionFactory};
