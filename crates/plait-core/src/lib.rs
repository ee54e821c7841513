//! Shared foundation for the plait workspace: configuration, the common
//! error conventions, and the `Signal` synchronization primitive used by
//! the confirmation gate, the animation handshake, and the compactor.

pub mod config;
pub mod error;
pub mod sync;

pub use error::{CoreError, Result};
