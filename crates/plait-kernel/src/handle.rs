//! Kernel transport: a child process (or any channel pair) exchanging
//! wire-protocol frames with the session.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{KernelError, Result};
use crate::protocol::{KernelMessage, KernelRequest};
use crate::session::SessionPaths;

const CHANNEL_CAPACITY: usize = 256;

/// Bidirectional handle to a running kernel.
///
/// Requests go out through an mpsc sender; messages come back through a
/// receiver guarded by an async mutex, which also serializes executions:
/// whoever drives an operation holds the receiver until its idle status.
pub struct KernelHandle {
    req_tx: mpsc::Sender<KernelRequest>,
    msg_rx: tokio::sync::Mutex<mpsc::Receiver<KernelMessage>>,
    pid: Option<u32>,
    child: std::sync::Mutex<Option<Child>>,
}

impl KernelHandle {
    /// Wrap an alternate transport (embedded kernels, test doubles).
    pub fn from_channels(
        req_tx: mpsc::Sender<KernelRequest>,
        msg_rx: mpsc::Receiver<KernelMessage>,
    ) -> Self {
        Self {
            req_tx,
            msg_rx: tokio::sync::Mutex::new(msg_rx),
            pid: None,
            child: std::sync::Mutex::new(None),
        }
    }

    /// Spawn `command` in `cwd` with stderr captured to `log_path`, and
    /// wire its stdin/stdout to the request/message channels.
    pub fn spawn(command: &[String], cwd: &Path, log_path: &Path) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| KernelError::StartFailed("empty kernel command".to_string()))?;

        let log_file = std::fs::File::create(log_path)?;
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KernelError::StartFailed(format!("spawn {program}: {e}")))?;

        let pid = child.id();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| KernelError::StartFailed("kernel stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KernelError::StartFailed("kernel stdout unavailable".to_string()))?;

        let (req_tx, mut req_rx) = mpsc::channel::<KernelRequest>(CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = mpsc::channel::<KernelMessage>(CHANNEL_CAPACITY);

        // Writer: drain requests into the child's stdin, one JSON per line.
        tokio::spawn(async move {
            while let Some(req) = req_rx.recv().await {
                let mut line = match serde_json::to_string(&req) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "unserializable kernel request, dropping");
                        continue;
                    }
                };
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    debug!("kernel stdin closed, writer exiting");
                    break;
                }
            }
        });

        // Reader: parse stdout lines into messages. Non-protocol lines are
        // logged and skipped so a chatty kernel cannot wedge the session.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<KernelMessage>(&line) {
                    Ok(msg) => {
                        if msg_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, line, "unparsable kernel message"),
                }
            }
            debug!("kernel stdout closed, reader exiting");
        });

        Ok(Self {
            req_tx,
            msg_rx: tokio::sync::Mutex::new(msg_rx),
            pid,
            child: std::sync::Mutex::new(Some(child)),
        })
    }

    pub async fn send(&self, req: KernelRequest) -> Result<()> {
        self.req_tx
            .send(req)
            .await
            .map_err(|_| KernelError::Protocol("kernel channel closed".to_string()))
    }

    /// Exclusive access to the message stream for one operation.
    pub async fn messages(&self) -> tokio::sync::MutexGuard<'_, mpsc::Receiver<KernelMessage>> {
        self.msg_rx.lock().await
    }

    /// Best-effort SIGINT to the kernel process group leader.
    pub fn interrupt(&self) {
        if let Some(pid) = self.pid {
            #[cfg(unix)]
            // Safety: pid is our direct child.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGINT);
            }
            #[cfg(not(unix))]
            let _ = pid;
        }
    }

    /// Wait for the child to exit within `timeout`; `true` when it did.
    /// Channel-backed handles have no child and report `true` immediately.
    pub async fn wait_exit(&self, timeout: std::time::Duration) -> bool {
        let child = self.child.lock().unwrap().take();
        let Some(mut child) = child else {
            return true;
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(_) => true,
            Err(_) => {
                // put it back so force_kill can reach it
                *self.child.lock().unwrap() = Some(child);
                false
            }
        }
    }

    pub async fn force_kill(&self) {
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
    }
}

/// Abstracts how kernels come to life so the manager can host subprocess
/// kernels, containerized kernels, or in-process doubles.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn launch(&self, paths: &SessionPaths) -> Result<KernelHandle>;
}

/// Spawns the configured kernel argv with the session `cwd` as working
/// directory and stderr logged under the session's kernel directory.
pub struct ProcessLauncher {
    command: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl KernelLauncher for ProcessLauncher {
    async fn launch(&self, paths: &SessionPaths) -> Result<KernelHandle> {
        let log_path = paths.kernel_dir.join("kernel.log");
        KernelHandle::spawn(&self.command, &paths.cwd, &log_path)
    }
}
