//! Server-side owner of all kernel sessions and their working directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use plait_core::config::KernelConfig;

use crate::error::ManagerError;
use crate::handle::KernelLauncher;
use crate::result::ExecutionResult;
use crate::session::{KernelSession, OutputCallback, SessionPaths};

/// Metadata snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub loaded_plugins: Vec<String>,
    pub execution_count: u64,
}

impl SessionInfo {
    fn of(session: &KernelSession) -> Self {
        Self {
            session_id: session.session_id().to_string(),
            cwd: session.cwd().display().to_string(),
            created_at: session.created_at(),
            last_activity: session.last_activity(),
            loaded_plugins: session.loaded_plugins(),
            execution_count: session.execution_count(),
        }
    }
}

/// Lifecycle manager for many [`KernelSession`]s.
///
/// The id map is guarded by a plain mutex held only for lookups and
/// membership changes; kernel I/O always happens on a cloned
/// `Arc<KernelSession>` outside the lock.
pub struct SessionManager {
    work_dir: PathBuf,
    launcher: Arc<dyn KernelLauncher>,
    kernel: KernelConfig,
    sessions: Mutex<HashMap<String, Arc<KernelSession>>>,
}

impl SessionManager {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        launcher: Arc<dyn KernelLauncher>,
        kernel: KernelConfig,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            launcher,
            kernel,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Start a new kernel session. Creating an id that already exists
    /// fails with `SessionExists` and leaves the existing session alone.
    pub async fn create(
        &self,
        session_id: Option<String>,
        cwd: Option<PathBuf>,
    ) -> Result<SessionInfo, ManagerError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.sessions.lock().unwrap().contains_key(&session_id) {
            return Err(ManagerError::SessionExists(session_id));
        }

        let paths = SessionPaths::create(&self.work_dir, &session_id, cwd.as_deref())?;
        let session = Arc::new(
            KernelSession::start(
                session_id.clone(),
                paths,
                self.launcher.as_ref(),
                Duration::from_secs(self.kernel.start_timeout_secs),
                Duration::from_secs(self.kernel.exec_timeout_secs),
            )
            .await?,
        );

        // Re-check under the lock: a concurrent create may have won the id
        // while our kernel was starting.
        let raced = {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&session_id) {
                true
            } else {
                sessions.insert(session_id.clone(), Arc::clone(&session));
                false
            }
        };
        if raced {
            warn!(session_id, "lost create race, stopping duplicate kernel");
            session.stop().await;
            return Err(ManagerError::SessionExists(session_id));
        }

        info!(session_id, "session created");
        Ok(SessionInfo::of(&session))
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<KernelSession>, ManagerError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))
    }

    pub fn info(&self, session_id: &str) -> Result<SessionInfo, ManagerError> {
        let session = self.get(session_id)?;
        Ok(SessionInfo::of(&session))
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .map(|s| SessionInfo::of(s))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Stop the kernel, then remove the record.
    pub async fn stop(&self, session_id: &str) -> Result<(), ManagerError> {
        let session = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions
                .remove(session_id)
                .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))?
        };
        session.stop().await;
        info!(session_id, "session stopped");
        Ok(())
    }

    /// Stop every session (server shutdown path).
    pub async fn stop_all(&self) {
        let sessions: Vec<Arc<KernelSession>> =
            self.sessions.lock().unwrap().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.stop().await;
        }
    }

    pub async fn load_plugin(
        &self,
        session_id: &str,
        name: &str,
        source: &str,
        config: Map<String, Value>,
    ) -> Result<(), ManagerError> {
        let session = self.get(session_id)?;
        session.register_plugin(name, source, config).await?;
        Ok(())
    }

    pub async fn execute(
        &self,
        session_id: &str,
        exec_id: &str,
        code: &str,
        on_output: Option<OutputCallback>,
    ) -> Result<ExecutionResult, ManagerError> {
        let session = self.get(session_id)?;
        Ok(session.execute(exec_id, code, on_output).await?)
    }

    /// Run `execute` on a spawned task so an event loop never blocks on
    /// kernel I/O.
    pub fn execute_async(
        self: &Arc<Self>,
        session_id: String,
        exec_id: String,
        code: String,
        on_output: Option<OutputCallback>,
    ) -> tokio::task::JoinHandle<Result<ExecutionResult, ManagerError>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .execute(&session_id, &exec_id, &code, on_output)
                .await
        })
    }

    pub async fn update_variables(
        &self,
        session_id: &str,
        variables: Map<String, Value>,
    ) -> Result<(), ManagerError> {
        let session = self.get(session_id)?;
        session.update_variables(variables).await?;
        Ok(())
    }

    pub async fn upload_file(
        &self,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ManagerError> {
        let session = self.get(session_id)?;
        Ok(session.upload_file(filename, bytes).await?)
    }

    pub fn artifact_path(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<PathBuf, ManagerError> {
        let session = self.get(session_id)?;
        Ok(session.artifact_path(name)?)
    }
}
