use std::collections::HashMap;
use std::sync::Arc;

use plait_core::config::PlaitConfig;
use plait_events::{ConfirmationGate, EventBus};
use plait_kernel::ExecutionResult;
use plait_memory::Post;

use crate::error::RoleError;
use crate::memory::Memory;
use crate::provider::ChatModel;

/// Everything a role needs for one reply: memory access, the event
/// pipeline, the gate, and the post addressed to it.
pub struct TurnContext<'a> {
    pub memory: &'a Memory,
    pub bus: &'a Arc<EventBus>,
    pub gate: &'a Arc<ConfirmationGate>,
    pub round_id: &'a str,
    pub input: &'a Post,
}

/// A conversation participant. Implementations stream their post through
/// a proxy obtained from `ctx.bus` and return the frozen post.
pub trait Role: Send {
    fn alias(&self) -> &str;
    fn reply(&mut self, ctx: &mut TurnContext<'_>) -> Result<Post, RoleError>;
}

/// Code-execution seam used by workers. The production implementation
/// forwards to the execution server through the blocking client; tests
/// substitute scripted executors.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        exec_id: &str,
        code: &str,
        on_output: &mut (dyn FnMut(&str, &str) + Send),
    ) -> Result<ExecutionResult, RoleError>;

    fn upload_file(&self, filename: &str, bytes: &[u8]) -> Result<(), RoleError>;
}

/// Forwarder to a remote execution session over HTTP/SSE.
pub struct RemoteExecutor {
    client: plait_client::blocking::Client,
}

impl RemoteExecutor {
    pub fn new(client: plait_client::blocking::Client) -> Self {
        Self { client }
    }
}

impl Executor for RemoteExecutor {
    fn execute(
        &self,
        exec_id: &str,
        code: &str,
        on_output: &mut (dyn FnMut(&str, &str) + Send),
    ) -> Result<ExecutionResult, RoleError> {
        self.client
            .execute(exec_id, code, Some(on_output))
            .map_err(|e| RoleError::Transport(e.to_string()))
    }

    fn upload_file(&self, filename: &str, bytes: &[u8]) -> Result<(), RoleError> {
        self.client
            .upload_file(filename, bytes)
            .map_err(|e| RoleError::Transport(e.to_string()))
    }
}

/// Construction inputs shared by every role builder.
pub struct RoleInit<'a> {
    pub config: &'a PlaitConfig,
    pub model: Arc<dyn ChatModel>,
    pub executor: Arc<dyn Executor>,
    /// Aliases of the session's workers (everything but the Planner).
    pub workers: Vec<String>,
}

pub type RoleBuilder = fn(&RoleInit<'_>) -> Box<dyn Role>;

/// Static table mapping configured role aliases to constructors. Role
/// discovery is compile-time: extended roles register themselves here at
/// session build.
pub struct RoleRegistry {
    builders: HashMap<String, RoleBuilder>,
}

impl RoleRegistry {
    /// Registry with the built-in roles.
    pub fn builtin() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register("Planner", crate::planner::Planner::build);
        registry.register("CodeInterpreter", crate::interpreter::CodeInterpreter::build);
        registry
    }

    pub fn register(&mut self, alias: impl Into<String>, builder: RoleBuilder) {
        self.builders.insert(alias.into(), builder);
    }

    pub fn build(&self, alias: &str, init: &RoleInit<'_>) -> Option<Box<dyn Role>> {
        self.builders.get(alias).map(|builder| builder(init))
    }

    pub fn known(&self, alias: &str) -> bool {
        self.builders.contains_key(alias)
    }
}
