//! Wire protocol of the web gateway's duplex connection.
//!
//! Frames are JSON objects tagged by `type`. The schema is stable: UI
//! clients replay history and live-stream from the same frame set.

pub mod frames;

pub use frames::{ClientFrame, FileRef, ServerFrame};
