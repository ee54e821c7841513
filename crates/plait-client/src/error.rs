use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server did not answer the health probe or dropped mid-request.
    #[error("Execution server unreachable at {url}: {reason}")]
    ServerUnreachable { url: String, reason: String },

    /// The server rejected our API key (HTTP 401).
    #[error("Execution server requires authentication")]
    AuthRequired,

    /// Auto-start spawned a server but it never became healthy.
    #[error("Execution server failed to start: {0}")]
    ServerStartFailed(String),

    /// Any other non-2xx response; `detail` is the server's message.
    #[error("Execution server error ({status}): {detail}")]
    Api { status: u16, detail: String },

    /// Client-side request deadline expired.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// An SSE stream ended without a terminal result.
    #[error("Malformed stream: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
