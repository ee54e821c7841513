use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire and lifecycle constants shared across the workspace.
pub const DEFAULT_SERVER_PORT: u16 = 8577;
pub const DEFAULT_GATEWAY_PORT: u16 = 8321;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Hard cap on a single duplex-connection frame.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;
/// Truncation limit applied to surfaced variable reprs.
pub const VARIABLE_REPR_LIMIT: usize = 500;

/// Top-level config (plait.toml + PLAIT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlaitConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub code_interpreter: CodeInterpreterConfig,
}

/// Bind address of the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_bind(),
            port: DEFAULT_GATEWAY_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub server: ExecServerConfig,
}

/// Execution server endpoint + launch policy, shared by the server binary
/// and the client-side launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Shared auth key. Empty disables the key check entirely.
    #[serde(default)]
    pub api_key: String,
    /// Loopback peers bypass the key check when set.
    #[serde(default = "bool_true")]
    pub allow_localhost: bool,
    /// Spawn a local server when the health probe fails.
    #[serde(default = "bool_true")]
    pub auto_start: bool,
    /// Auto-start inside a container runtime instead of a subprocess.
    #[serde(default)]
    pub container: bool,
    #[serde(default = "default_container_image")]
    pub container_image: String,
    #[serde(default = "default_bind")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Per-request deadline, seconds. Also bounds server startup polling.
    #[serde(default = "default_server_timeout")]
    pub timeout: u64,
}

impl Default for ExecServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_key: String::new(),
            allow_localhost: true,
            auto_start: true,
            container: false,
            container_image: default_container_image(),
            host: default_bind(),
            port: DEFAULT_SERVER_PORT,
            timeout: default_server_timeout(),
        }
    }
}

/// How the execution server launches and supervises kernel children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Kernel launcher argv. The child speaks the plait kernel wire protocol
    /// on stdin/stdout; the language behind it is the launcher's business.
    #[serde(default = "default_kernel_command")]
    pub command: Vec<String>,
    #[serde(default = "default_kernel_start_timeout")]
    pub start_timeout_secs: u64,
    /// Soft deadline for one execution; expiry interrupts the kernel.
    #[serde(default = "default_kernel_exec_timeout")]
    pub exec_timeout_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            command: default_kernel_command(),
            start_timeout_secs: default_kernel_start_timeout(),
            exec_timeout_secs: default_kernel_exec_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Role aliases instantiated per session, in invocation-priority order.
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Upper bound on Planner/Worker hops within one round.
    #[serde(default = "default_max_internal_rounds")]
    pub max_internal_chat_round: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            roles: default_roles(),
            work_dir: default_work_dir(),
            max_internal_chat_round: default_max_internal_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Uncompacted round count that triggers a cycle.
    #[serde(default = "default_compaction_threshold")]
    pub threshold: usize,
    /// Recent rounds excluded from every cycle.
    #[serde(default = "default_retain_recent")]
    pub retain_recent: usize,
    /// Per-role prompt template paths, keyed by role alias.
    #[serde(default)]
    pub prompts: std::collections::HashMap<String, String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_compaction_threshold(),
            retain_recent: default_retain_recent(),
            prompts: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeInterpreterConfig {
    /// Gate every code execution on user approval.
    #[serde(default)]
    pub require_confirmation: bool,
    #[serde(default = "default_max_retry")]
    pub max_retry_count: u32,
    /// Module allow-list for generated code. Empty allows everything.
    #[serde(default)]
    pub allowed_modules: Vec<String>,
    /// Function deny-list for generated code.
    #[serde(default)]
    pub forbidden_functions: Vec<String>,
}

impl Default for CodeInterpreterConfig {
    fn default() -> Self {
        Self {
            require_confirmation: false,
            max_retry_count: default_max_retry(),
            allowed_modules: Vec::new(),
            forbidden_functions: Vec::new(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}
fn default_server_url() -> String {
    format!("http://{}:{}", DEFAULT_BIND, DEFAULT_SERVER_PORT)
}
fn default_container_image() -> String {
    "plait-executor:latest".to_string()
}
fn default_server_timeout() -> u64 {
    30
}
fn default_kernel_command() -> Vec<String> {
    vec!["plait-kernel-host".to_string()]
}
fn default_kernel_start_timeout() -> u64 {
    30
}
fn default_kernel_exec_timeout() -> u64 {
    600
}
fn default_roles() -> Vec<String> {
    vec!["Planner".to_string(), "CodeInterpreter".to_string()]
}
fn default_work_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.plait", home)
}
fn default_max_internal_rounds() -> u32 {
    10
}
fn default_compaction_threshold() -> usize {
    10
}
fn default_retain_recent() -> usize {
    3
}
fn default_max_retry() -> u32 {
    3
}

impl PlaitConfig {
    /// Load config from a TOML file with PLAIT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. PLAIT_CONFIG env var
    ///   3. ~/.plait/plait.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("PLAIT_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: PlaitConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PLAIT_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.plait/plait.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PlaitConfig::default();
        assert_eq!(cfg.execution.server.port, DEFAULT_SERVER_PORT);
        assert!(cfg.execution.server.auto_start);
        assert_eq!(cfg.compaction.threshold, 10);
        assert_eq!(cfg.compaction.retain_recent, 3);
        assert_eq!(cfg.code_interpreter.max_retry_count, 3);
        assert!(!cfg.code_interpreter.require_confirmation);
        assert_eq!(
            cfg.session.roles,
            vec!["Planner".to_string(), "CodeInterpreter".to_string()]
        );
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plait.toml");
        std::fs::write(
            &path,
            r#"
[execution.server]
port = 9000
api_key = "secret"
auto_start = false

[compaction]
threshold = 5
retain_recent = 2

[code_interpreter]
require_confirmation = true
"#,
        )
        .unwrap();

        let cfg = PlaitConfig::load(path.to_str()).unwrap();
        assert_eq!(cfg.execution.server.port, 9000);
        assert_eq!(cfg.execution.server.api_key, "secret");
        assert!(!cfg.execution.server.auto_start);
        assert_eq!(cfg.compaction.threshold, 5);
        assert_eq!(cfg.compaction.retain_recent, 2);
        assert!(cfg.code_interpreter.require_confirmation);
        // untouched sections keep their defaults
        assert_eq!(cfg.gateway.port, DEFAULT_GATEWAY_PORT);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = PlaitConfig::load(Some("/nonexistent/plait.toml")).unwrap();
        assert_eq!(cfg.execution.server.port, DEFAULT_SERVER_PORT);
    }
}
