//! Conversation memory: the append-only round/post data model, the
//! thread-safe `ConversationStore`, and the background `RoundCompactor`.
//!
//! The store is an in-memory arena keyed by ids. Posts and rounds never
//! hold references to each other; lookups resolve against the store under
//! its lock, and readers always receive cloned snapshots.

pub mod compaction;
pub mod error;
pub mod store;
pub mod types;

pub use compaction::{RoundCompactor, SummaryError, SummaryInput, Summarizer};
pub use error::{MemoryError, Result};
pub use store::ConversationStore;
pub use types::{
    Attachment, AttachmentKind, CompactedMessage, Post, Round, RoundState, SharedMemoryEntry,
    SharedScope,
};
