use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The role alias is not registered with the active session.
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// The round id does not exist in the conversation.
    #[error("Round not found: {0}")]
    RoundNotFound(String),

    /// A round state transition that would move backwards.
    #[error("Invalid round transition for {round_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        round_id: String,
        from: crate::types::RoundState,
        to: crate::types::RoundState,
    },
}

pub type Result<T> = std::result::Result<T, MemoryError>;
