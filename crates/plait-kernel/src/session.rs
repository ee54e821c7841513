//! One isolated interactive kernel bound to a fresh working directory.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use plait_core::config::VARIABLE_REPR_LIMIT;

use crate::error::{KernelError, Result};
use crate::handle::{KernelHandle, KernelLauncher};
use crate::protocol::{ExecState, KernelMessage, KernelRequest, MimeBundle, VariableEntry};
use crate::result::{Artifact, ExecutionResult, LogRecord};

/// Grace period between a shutdown request and a forced kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Synchronous per-chunk output callback: `(stream, text)`.
pub type OutputCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Directory layout of one session under the server work root:
/// `sessions/<id>/kernel` for connection files and logs,
/// `sessions/<id>/cwd` for artifacts and uploads.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub kernel_dir: PathBuf,
    pub cwd: PathBuf,
}

impl SessionPaths {
    /// Create the directory tree for a session. An explicit `cwd` override
    /// must still resolve under the work root.
    pub fn create(work_dir: &Path, session_id: &str, cwd: Option<&Path>) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let work_dir = work_dir.canonicalize()?;
        let root = work_dir.join("sessions").join(session_id);
        let kernel_dir = root.join("kernel");
        std::fs::create_dir_all(&kernel_dir)?;

        let cwd = match cwd {
            Some(explicit) => {
                std::fs::create_dir_all(explicit)?;
                let canonical = explicit.canonicalize()?;
                if !canonical.starts_with(&work_dir) {
                    return Err(KernelError::PathTraversal(
                        explicit.display().to_string(),
                    ));
                }
                canonical
            }
            None => {
                let default = root.join("cwd");
                std::fs::create_dir_all(&default)?;
                default.canonicalize()?
            }
        };

        Ok(Self {
            root,
            kernel_dir,
            cwd,
        })
    }
}

/// A stateful interactive kernel session.
///
/// All kernel traffic is serialized through the handle's message lock, so
/// one session runs one operation at a time; the manager layers
/// concurrency across sessions, never within one.
pub struct KernelSession {
    session_id: String,
    paths: SessionPaths,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    loaded_plugins: Mutex<HashSet<String>>,
    plugin_configs: Mutex<std::collections::HashMap<String, Map<String, Value>>>,
    execution_count: AtomicU64,
    handle: KernelHandle,
    exec_timeout: Duration,
    control_timeout: Duration,
    stopped: AtomicBool,
}

impl KernelSession {
    /// Launch a kernel and wait for its ready report.
    pub async fn start(
        session_id: impl Into<String>,
        paths: SessionPaths,
        launcher: &dyn KernelLauncher,
        start_timeout: Duration,
        exec_timeout: Duration,
    ) -> Result<Self> {
        let handle = launcher.launch(&paths).await?;
        Self::start_with_handle(session_id, paths, handle, start_timeout, exec_timeout).await
    }

    /// Adopt an already-connected transport and wait for ready.
    pub async fn start_with_handle(
        session_id: impl Into<String>,
        paths: SessionPaths,
        handle: KernelHandle,
        start_timeout: Duration,
        exec_timeout: Duration,
    ) -> Result<Self> {
        let session_id = session_id.into();
        wait_ready(&handle, start_timeout).await?;
        info!(session_id = %session_id, cwd = %paths.cwd.display(), "kernel ready");

        Ok(Self {
            session_id,
            paths,
            created_at: Utc::now(),
            last_activity: Mutex::new(Utc::now()),
            loaded_plugins: Mutex::new(HashSet::new()),
            plugin_configs: Mutex::new(Default::default()),
            execution_count: AtomicU64::new(0),
            handle,
            exec_timeout,
            control_timeout: start_timeout,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cwd(&self) -> &Path {
        &self.paths.cwd
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock().unwrap()
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded_plugins.lock().unwrap().iter().cloned().collect();
        names.sort();
        names
    }

    /// Submit `code` and consume kernel messages until the idle status for
    /// this execution.
    ///
    /// Stream chunks are collected *and* forwarded to `on_output`
    /// synchronously, in kernel emission order, without coalescing.
    /// Kernel-level failures come back as `is_success = false`; `Err` is
    /// reserved for transport loss and the soft deadline.
    pub async fn execute(
        &self,
        exec_id: &str,
        code: &str,
        on_output: Option<OutputCallback>,
    ) -> Result<ExecutionResult> {
        self.touch();
        let outcome = tokio::time::timeout(
            self.exec_timeout,
            self.drive_execution(exec_id, code, on_output),
        )
        .await;

        match outcome {
            Ok(result) => {
                self.execution_count.fetch_add(1, Ordering::Relaxed);
                result
            }
            Err(_) => {
                warn!(session_id = %self.session_id, exec_id, "execution deadline expired, interrupting");
                self.handle.interrupt();
                Err(KernelError::Timeout {
                    secs: self.exec_timeout.as_secs(),
                })
            }
        }
    }

    async fn drive_execution(
        &self,
        exec_id: &str,
        code: &str,
        on_output: Option<OutputCallback>,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::new(exec_id, code);

        self.handle
            .send(KernelRequest::Execute {
                exec_id: exec_id.to_string(),
                code: code.to_string(),
            })
            .await?;

        let mut messages = self.handle.messages().await;
        loop {
            let msg = messages
                .recv()
                .await
                .ok_or_else(|| KernelError::Protocol("kernel exited mid-execution".to_string()))?;
            match msg {
                KernelMessage::Stream {
                    exec_id: id,
                    name,
                    text,
                } if id == exec_id => {
                    // the chunk reaches the callback before the loop advances
                    if let Some(cb) = on_output.as_ref() {
                        cb(name.as_str(), &text);
                    }
                    match name {
                        crate::protocol::StreamName::Stdout => result.stdout.push(text),
                        crate::protocol::StreamName::Stderr => result.stderr.push(text),
                    }
                }
                KernelMessage::DisplayData { exec_id: id, data } if id == exec_id => {
                    self.collect_display(&mut result, data).await?;
                }
                KernelMessage::ExecuteResult { exec_id: id, data } if id == exec_id => {
                    result.output.extend(data);
                }
                KernelMessage::Error {
                    exec_id: id,
                    ename,
                    evalue,
                    traceback,
                } if id == exec_id => {
                    result.is_success = false;
                    let mut text = format!("{ename}: {evalue}");
                    if !traceback.is_empty() {
                        text.push('\n');
                        text.push_str(&traceback.join("\n"));
                    }
                    result.error = Some(text);
                }
                KernelMessage::Log {
                    level,
                    tag,
                    message,
                } => {
                    result.log.push(LogRecord {
                        level,
                        tag,
                        message,
                    });
                }
                KernelMessage::Status {
                    exec_id: id,
                    state: ExecState::Idle,
                } if id == exec_id => break,
                other => debug!(session_id = %self.session_id, ?other, "ignoring kernel message"),
            }
        }

        // Variable introspection happens after idle, on the same lock.
        self.handle.send(KernelRequest::ListVariables).await?;
        loop {
            let msg = messages.recv().await.ok_or_else(|| {
                KernelError::Protocol("kernel exited during introspection".to_string())
            })?;
            if let KernelMessage::Variables { entries } = msg {
                let plugins = self.loaded_plugins.lock().unwrap().clone();
                result.variables = surface_variables(entries, &plugins);
                break;
            }
        }

        Ok(result)
    }

    async fn collect_display(
        &self,
        result: &mut ExecutionResult,
        data: Vec<MimeBundle>,
    ) -> Result<()> {
        for bundle in data {
            if let Some(ext) = image_extension(&bundle.mime) {
                // Inline images are persisted to the session cwd so the
                // artifacts route can serve them later.
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(bundle.content.trim())
                    .map_err(|e| KernelError::Protocol(format!("bad inline image: {e}")))?;
                let index = result.artifacts.len();
                let file_name = if index == 0 {
                    format!("{}_image.{ext}", result.execution_id)
                } else {
                    format!("{}_image_{index}.{ext}", result.execution_id)
                };
                tokio::fs::write(self.paths.cwd.join(&file_name), &bytes).await?;
                result.artifacts.push(Artifact {
                    name: file_name.clone(),
                    artifact_type: "image".to_string(),
                    mime_type: bundle.mime.clone(),
                    original_name: file_name.clone(),
                    file_name,
                    file_content: None,
                    preview: String::new(),
                    download_url: None,
                });
            } else {
                result.output.push(bundle);
            }
        }
        Ok(())
    }

    /// Inject plugin source over the privileged control channel.
    pub async fn register_plugin(
        &self,
        name: &str,
        source: &str,
        config: Map<String, Value>,
    ) -> Result<()> {
        self.touch();
        self.handle
            .send(KernelRequest::RegisterPlugin {
                name: name.to_string(),
                source: source.to_string(),
                config: config.clone(),
            })
            .await?;

        let mut messages = self.handle.messages().await;
        let reply = tokio::time::timeout(self.control_timeout, async {
            loop {
                match messages.recv().await {
                    Some(KernelMessage::PluginReply {
                        name: n,
                        ok,
                        error,
                    }) if n == name => return Some((ok, error)),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .map_err(|_| KernelError::PluginLoadFailed {
            name: name.to_string(),
            reason: "no reply from kernel".to_string(),
        })?;

        match reply {
            Some((true, _)) => {
                self.loaded_plugins.lock().unwrap().insert(name.to_string());
                self.plugin_configs
                    .lock()
                    .unwrap()
                    .insert(name.to_string(), config);
                Ok(())
            }
            Some((false, error)) => Err(KernelError::PluginLoadFailed {
                name: name.to_string(),
                reason: error.unwrap_or_else(|| "kernel rejected plugin".to_string()),
            }),
            None => Err(KernelError::PluginLoadFailed {
                name: name.to_string(),
                reason: "kernel exited".to_string(),
            }),
        }
    }

    /// Write session-scoped variables into the kernel namespace.
    pub async fn update_variables(&self, variables: Map<String, Value>) -> Result<()> {
        self.touch();
        self.handle
            .send(KernelRequest::UpdateVariables { variables })
            .await
    }

    /// Store uploaded bytes at `cwd/<basename>`.
    ///
    /// Any filename whose basename differs after normalization is a
    /// traversal attempt and is rejected before touching the filesystem.
    pub async fn upload_file(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.touch();
        let base = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KernelError::PathTraversal(filename.to_string()))?;
        if base != filename || base == ".." || base == "." {
            return Err(KernelError::PathTraversal(filename.to_string()));
        }
        let target = self.paths.cwd.join(base);
        if !target.starts_with(&self.paths.cwd) {
            return Err(KernelError::PathTraversal(filename.to_string()));
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(target)
    }

    /// Absolute path of a previously-produced artifact, guaranteed to
    /// resolve under the session `cwd`.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        // Lexical screen first: parent components are traversal no matter
        // what the filesystem says.
        let requested = Path::new(name);
        if requested.is_absolute()
            || requested
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(KernelError::PathTraversal(name.to_string()));
        }

        let joined = self.paths.cwd.join(requested);
        let resolved = joined
            .canonicalize()
            .map_err(|_| KernelError::ArtifactNotFound(name.to_string()))?;
        if !resolved.starts_with(&self.paths.cwd) {
            return Err(KernelError::PathTraversal(name.to_string()));
        }
        Ok(resolved)
    }

    /// Interrupt, request shutdown, and force-kill after the grace period.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handle.interrupt();
        let _ = self.handle.send(KernelRequest::Shutdown).await;
        if !self.handle.wait_exit(STOP_GRACE).await {
            warn!(session_id = %self.session_id, "kernel ignored shutdown, killing");
            self.handle.force_kill().await;
        }
        info!(session_id = %self.session_id, "kernel stopped");
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Utc::now();
    }
}

async fn wait_ready(handle: &KernelHandle, timeout: Duration) -> Result<()> {
    let mut messages = handle.messages().await;
    tokio::time::timeout(timeout, async {
        loop {
            match messages.recv().await {
                Some(KernelMessage::Ready) => return Ok(()),
                Some(KernelMessage::Log { message, .. }) => {
                    debug!(message, "kernel startup log");
                }
                Some(_) => continue,
                None => {
                    return Err(KernelError::StartFailed(
                        "kernel exited before ready".to_string(),
                    ))
                }
            }
        }
    })
    .await
    .map_err(|_| KernelError::StartFailed(format!("no ready report within {timeout:?}")))?
}

/// Keep user-facing data variables only: no underscore-prefixed names, no
/// modules/functions/builtins, no plugin instances. Reprs are truncated to
/// a fixed limit.
fn surface_variables(
    entries: Vec<VariableEntry>,
    plugins: &HashSet<String>,
) -> Vec<(String, String)> {
    entries
        .into_iter()
        .filter(|e| e.kind == "data")
        .filter(|e| !e.name.starts_with('_'))
        .filter(|e| !plugins.contains(&e.name))
        .map(|e| {
            let repr = if e.repr.chars().count() > VARIABLE_REPR_LIMIT {
                e.repr.chars().take(VARIABLE_REPR_LIMIT).collect()
            } else {
                e.repr
            };
            (e.name, repr)
        })
        .collect()
}

fn image_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamName;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    /// In-process kernel double: canned message sequences keyed by code.
    struct Script {
        responses: HashMap<String, Vec<KernelMessage>>,
        variables: Vec<VariableEntry>,
        /// When set, executions never reach idle.
        hang: bool,
    }

    impl Script {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                variables: Vec::new(),
                hang: false,
            }
        }

        fn on(mut self, code: &str, messages: Vec<KernelMessage>) -> Self {
            self.responses.insert(code.to_string(), messages);
            self
        }

        fn with_variables(mut self, variables: Vec<VariableEntry>) -> Self {
            self.variables = variables;
            self
        }
    }

    fn stream(exec_id: &str, name: StreamName, text: &str) -> KernelMessage {
        KernelMessage::Stream {
            exec_id: exec_id.to_string(),
            name,
            text: text.to_string(),
        }
    }

    fn scripted_handle(script: Script) -> KernelHandle {
        let (req_tx, mut req_rx) = mpsc::channel(64);
        let (msg_tx, msg_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let _ = msg_tx.send(KernelMessage::Ready).await;
            while let Some(req) = req_rx.recv().await {
                match req {
                    KernelRequest::Execute { exec_id, code } => {
                        for msg in script.responses.get(&code).cloned().unwrap_or_default() {
                            let _ = msg_tx.send(msg).await;
                        }
                        if script.hang {
                            continue;
                        }
                        let _ = msg_tx
                            .send(KernelMessage::Status {
                                exec_id,
                                state: ExecState::Idle,
                            })
                            .await;
                    }
                    KernelRequest::ListVariables => {
                        let _ = msg_tx
                            .send(KernelMessage::Variables {
                                entries: script.variables.clone(),
                            })
                            .await;
                    }
                    KernelRequest::RegisterPlugin { name, source, .. } => {
                        let ok = !source.contains("syntax error");
                        let _ = msg_tx
                            .send(KernelMessage::PluginReply {
                                name,
                                ok,
                                error: (!ok).then(|| "compile failed".to_string()),
                            })
                            .await;
                    }
                    KernelRequest::Shutdown => break,
                    _ => {}
                }
            }
        });
        KernelHandle::from_channels(req_tx, msg_rx)
    }

    async fn session_with(script: Script) -> (KernelSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::create(dir.path(), "s1", None).unwrap();
        let session = KernelSession::start_with_handle(
            "s1",
            paths,
            scripted_handle(script),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        (session, dir)
    }

    fn var(name: &str, repr: &str, kind: &str) -> VariableEntry {
        VariableEntry {
            name: name.to_string(),
            repr: repr.to_string(),
            kind: kind.to_string(),
        }
    }

    #[tokio::test]
    async fn basic_execute_collects_stdout() {
        let script = Script::new().on(
            "print('hello')",
            vec![stream("e1", StreamName::Stdout, "hello\n")],
        );
        let (session, _dir) = session_with(script).await;

        let result = session.execute("e1", "print('hello')", None).await.unwrap();
        assert!(result.is_success);
        assert_eq!(result.stdout, vec!["hello\n"]);
        assert!(result.variables.is_empty());
        assert!(result.artifacts.is_empty());
        assert_eq!(session.execution_count(), 1);
    }

    #[tokio::test]
    async fn on_output_sees_chunks_in_order_uncoalesced() {
        let script = Script::new().on(
            "for i in range(3): print(i)",
            vec![
                stream("e2", StreamName::Stdout, "0\n"),
                stream("e2", StreamName::Stdout, "1\n"),
                stream("e2", StreamName::Stdout, "2\n"),
            ],
        );
        let (session, _dir) = session_with(script).await;

        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen2 = Arc::clone(&seen);
        let cb: OutputCallback = Arc::new(move |stream, text| {
            seen2.lock().unwrap().push(format!("{stream}:{text}"));
        });
        let result = session
            .execute("e2", "for i in range(3): print(i)", Some(cb))
            .await
            .unwrap();

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["stdout:0\n", "stdout:1\n", "stdout:2\n"]
        );
        // invariant: concatenated chunks equal concatenated callbacks
        assert_eq!(result.stdout.concat(), "0\n1\n2\n");
    }

    #[tokio::test]
    async fn variables_are_filtered_and_truncated() {
        let script = Script::new()
            .on("x = 41; y = x + 1", vec![])
            .with_variables(vec![
                var("x", "41", "data"),
                var("y", "42", "data"),
                var("_scratch", "9", "data"),
                var("pd", "<module 'pandas'>", "module"),
                var("np", "<module 'numpy'>", "module"),
                var("plt", "<module 'matplotlib.pyplot'>", "module"),
                var("helper", "<function helper>", "function"),
                var("big", &"x".repeat(600), "data"),
            ]);
        let (session, _dir) = session_with(script).await;

        let result = session.execute("e3", "x = 41; y = x + 1", None).await.unwrap();
        let names: Vec<&str> = result.variables.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "big"]);
        assert!(result
            .variables
            .iter()
            .any(|(n, r)| n == "x" && r == "41"));
        assert!(result
            .variables
            .iter()
            .any(|(n, r)| n == "y" && r == "42"));
        let big = result.variables.iter().find(|(n, _)| n == "big").unwrap();
        assert_eq!(big.1.len(), VARIABLE_REPR_LIMIT);
    }

    #[tokio::test]
    async fn kernel_error_is_a_failed_result_not_an_err() {
        let script = Script::new().on(
            "1/0",
            vec![KernelMessage::Error {
                exec_id: "e4".to_string(),
                ename: "ZeroDivisionError".to_string(),
                evalue: "division by zero".to_string(),
                traceback: vec!["line 1".to_string()],
            }],
        );
        let (session, _dir) = session_with(script).await;

        let result = session.execute("e4", "1/0", None).await.unwrap();
        assert!(!result.is_success);
        let error = result.error.unwrap();
        assert!(error.contains("ZeroDivisionError"));
        assert!(error.contains("line 1"));
    }

    #[tokio::test]
    async fn inline_image_is_persisted_as_artifact() {
        let png = base64::engine::general_purpose::STANDARD.encode(b"not-really-png");
        let script = Script::new().on(
            "plot()",
            vec![KernelMessage::DisplayData {
                exec_id: "e5".to_string(),
                data: vec![MimeBundle {
                    mime: "image/png".to_string(),
                    content: png,
                }],
            }],
        );
        let (session, _dir) = session_with(script).await;

        let result = session.execute("e5", "plot()", None).await.unwrap();
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].file_name, "e5_image.png");
        let path = session.artifact_path("e5_image.png").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"not-really-png");
    }

    #[tokio::test]
    async fn hung_execution_times_out() {
        let mut script = Script::new();
        script.hang = true;
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::create(dir.path(), "s1", None).unwrap();
        let session = KernelSession::start_with_handle(
            "s1",
            paths,
            scripted_handle(script),
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        let err = session.execute("e6", "while True: pass", None).await;
        assert!(matches!(err, Err(KernelError::Timeout { .. })));
    }

    #[tokio::test]
    async fn upload_rejects_traversal_and_overwrites_cleanly() {
        let (session, dir) = session_with(Script::new()).await;

        let err = session.upload_file("../escape.txt", b"boo").await;
        assert!(matches!(err, Err(KernelError::PathTraversal(_))));
        assert!(!dir.path().join("escape.txt").exists());

        session.upload_file("data.csv", b"a,b\n1,2\n").await.unwrap();
        session.upload_file("data.csv", b"c,d\n3,4\n").await.unwrap();
        let path = session.artifact_path("data.csv").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"c,d\n3,4\n");
    }

    #[tokio::test]
    async fn artifact_path_never_escapes_cwd() {
        let (session, dir) = session_with(Script::new()).await;
        std::fs::write(dir.path().join("secret.txt"), b"hidden").unwrap();

        assert!(matches!(
            session.artifact_path("../secret.txt"),
            Err(KernelError::PathTraversal(_))
        ));
        assert!(matches!(
            session.artifact_path("/etc/passwd"),
            Err(KernelError::PathTraversal(_))
        ));
        assert!(matches!(
            session.artifact_path("missing.txt"),
            Err(KernelError::ArtifactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn plugin_registration_round_trip() {
        let (session, _dir) = session_with(Script::new()).await;
        session
            .register_plugin("sql_pull", "class SqlPull: ...", Map::new())
            .await
            .unwrap();
        assert_eq!(session.loaded_plugins(), vec!["sql_pull"]);

        let err = session
            .register_plugin("bad", "syntax error here", Map::new())
            .await;
        assert!(matches!(err, Err(KernelError::PluginLoadFailed { .. })));
        assert_eq!(session.loaded_plugins(), vec!["sql_pull"]);
    }

    #[tokio::test]
    async fn plugin_instances_are_hidden_from_variables() {
        let script = Script::new()
            .on("use_plugin()", vec![])
            .with_variables(vec![
                var("sql_pull", "<plugin>", "data"),
                var("rows", "[1, 2]", "data"),
            ]);
        let (session, _dir) = session_with(script).await;
        session
            .register_plugin("sql_pull", "class SqlPull: ...", Map::new())
            .await
            .unwrap();

        let result = session.execute("e7", "use_plugin()", None).await.unwrap();
        let names: Vec<&str> = result.variables.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["rows"]);
    }
}
