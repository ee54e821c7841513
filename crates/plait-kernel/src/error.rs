use thiserror::Error;

/// Errors from a single kernel session.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The kernel process never reported ready.
    #[error("Kernel start failed: {0}")]
    StartFailed(String),

    /// The kernel rejected a plugin registration.
    #[error("Plugin load failed for '{name}': {reason}")]
    PluginLoadFailed { name: String, reason: String },

    /// A file path tried to escape the session working directory.
    #[error("Path escapes session working directory: {0}")]
    PathTraversal(String),

    /// No artifact with that name under the session working directory.
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// An execution exceeded its soft deadline and was interrupted.
    #[error("Execution timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The kernel channel closed or sent something unintelligible.
    #[error("Kernel protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KernelError {
    /// Short error code string surfaced in HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::StartFailed(_) => "KERNEL_START_FAILED",
            KernelError::PluginLoadFailed { .. } => "PLUGIN_LOAD_FAILED",
            KernelError::PathTraversal(_) => "PATH_TRAVERSAL",
            KernelError::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
            KernelError::Timeout { .. } => "TIMEOUT",
            KernelError::Protocol(_) => "KERNEL_PROTOCOL_ERROR",
            KernelError::Io(_) => "IO_ERROR",
        }
    }
}

/// Errors from the session map.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl ManagerError {
    pub fn code(&self) -> &'static str {
        match self {
            ManagerError::SessionExists(_) => "SESSION_EXISTS",
            ManagerError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ManagerError::Kernel(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;
