//! Blocking facade over the async client for thread-based workers.
//!
//! Orchestrator roles run on dedicated OS threads, not the Tokio
//! runtime, so this wrapper owns a current-thread runtime and drives the
//! async client to completion per call, the same shape reqwest's own
//! blocking client uses.

use serde_json::{Map, Value};

use plait_core::config::ExecServerConfig;
use plait_kernel::ExecutionResult;

use crate::client::Client as AsyncClient;
use crate::error::Result;
use crate::launcher::Launcher;

pub struct Client {
    inner: AsyncClient,
    launcher: Launcher,
    rt: tokio::runtime::Runtime,
}

impl Client {
    pub fn new(config: &ExecServerConfig, session_id: impl Into<String>) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            inner: AsyncClient::new(config, session_id)?,
            launcher: Launcher::new(config.clone()),
            rt,
        })
    }

    pub fn session_id(&self) -> &str {
        self.inner.session_id()
    }

    /// Probe (and auto-start) the server, then create the bound session.
    pub fn ensure_ready(&self) -> Result<()> {
        self.rt.block_on(async {
            self.launcher.ensure_running(&self.inner).await?;
            self.inner.ensure_session().await
        })
    }

    pub fn execute(
        &self,
        exec_id: &str,
        code: &str,
        on_output: Option<&mut (dyn FnMut(&str, &str) + Send)>,
    ) -> Result<ExecutionResult> {
        self.rt
            .block_on(self.inner.execute(exec_id, code, on_output))
    }

    pub fn register_plugin(
        &self,
        name: &str,
        code: &str,
        config: Map<String, Value>,
    ) -> Result<()> {
        self.rt
            .block_on(self.inner.register_plugin(name, code, config))
    }

    pub fn update_variables(&self, variables: Map<String, Value>) -> Result<()> {
        self.rt.block_on(self.inner.update_variables(variables))
    }

    pub fn upload_file(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        self.rt.block_on(self.inner.upload_file(filename, bytes))
    }

    pub fn download_artifact(&self, name: &str) -> Result<Vec<u8>> {
        self.rt.block_on(self.inner.download_artifact(name))
    }

    pub fn stop_session(&self) -> Result<()> {
        self.rt.block_on(self.inner.stop_session())
    }
}
