use thiserror::Error;

use plait_events::ConfirmationError;
use plait_memory::MemoryError;

use crate::provider::ModelError;

/// Failures inside one role's reply.
///
/// Verification and kernel-execution failures are recoverable: the worker
/// consumes them in its own retry loop and only a drained budget reaches
/// the Planner. Everything else fails the round.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("Code verification failed: {0}")]
    CodeVerificationFailed(String),

    #[error("Kernel execution failed: {0}")]
    KernelExecutionFailed(String),

    #[error("Execution denied by user")]
    ConfirmationDenied,

    #[error("Confirmation unavailable: {0}")]
    Confirmation(#[from] ConfirmationError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Unparseable model response: {0}")]
    InvalidResponse(String),

    #[error("Execution transport failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl RoleError {
    /// Recoverable errors feed the worker's retry loop instead of
    /// surfacing immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RoleError::CodeVerificationFailed(_) | RoleError::KernelExecutionFailed(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Role '{role}' failed: {source}")]
    RoleFailed {
        role: String,
        #[source]
        source: RoleError,
    },

    #[error("No role registered for recipient '{0}'")]
    UnknownRecipient(String),

    #[error("Round exceeded {0} internal hops without reaching the user")]
    HopBudgetExceeded(u32),

    #[error("A turn is already in flight for this session")]
    TurnInFlight,

    #[error(transparent)]
    Memory(#[from] MemoryError),
}
