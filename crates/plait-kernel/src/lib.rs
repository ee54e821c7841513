//! Isolated interactive execution kernels and their server-side manager.
//!
//! A kernel is a child process speaking newline-delimited JSON on
//! stdin/stdout: the classic interactive-kernel message taxonomy
//! (status, stream, display_data, execute_result, error) without
//! assuming anything about the language running inside. `KernelSession` wraps one
//! kernel with a fresh working directory; `SessionManager` owns many.

pub mod error;
pub mod handle;
pub mod manager;
pub mod protocol;
pub mod result;
pub mod session;

pub use error::{KernelError, ManagerError};
pub use handle::{KernelHandle, KernelLauncher, ProcessLauncher};
pub use manager::{SessionInfo, SessionManager};
pub use protocol::{ExecState, KernelMessage, KernelRequest, MimeBundle, StreamName, VariableEntry};
pub use result::{Artifact, ExecutionResult, LogRecord};
pub use session::{KernelSession, OutputCallback, SessionPaths};
