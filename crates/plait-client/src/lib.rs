//! Client-side binding of the execution server: the same interface shape
//! as a local kernel session, forwarded over HTTP/SSE, plus a launcher
//! that spawns a local server when none is reachable.

pub mod blocking;
pub mod client;
pub mod error;
pub mod launcher;
pub mod sse;

pub use client::{Client, HealthInfo};
pub use error::{ClientError, Result};
pub use launcher::Launcher;
