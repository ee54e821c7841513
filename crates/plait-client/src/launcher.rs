//! Local server auto-start: probe, spawn, poll until healthy.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use plait_core::config::ExecServerConfig;

use crate::client::Client;
use crate::error::{ClientError, Result};

/// Delay between readiness polls while the spawned server boots.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Spawns a local execution server when the configured URL answers no
/// health probe, either as a plain subprocess or inside a container.
pub struct Launcher {
    config: ExecServerConfig,
}

impl Launcher {
    pub fn new(config: ExecServerConfig) -> Self {
        Self { config }
    }

    /// Make sure a server answers at the configured URL, spawning one if
    /// allowed. Fails with `ServerStartFailed` when the startup deadline
    /// elapses and `ServerUnreachable` when auto-start is disabled.
    pub async fn ensure_running(&self, client: &Client) -> Result<()> {
        if client.probe().await.is_ok() {
            debug!(url = %client.base_url(), "execution server already up");
            return Ok(());
        }
        if !self.config.auto_start {
            return Err(ClientError::ServerUnreachable {
                url: client.base_url().to_string(),
                reason: "no server and auto_start is disabled".to_string(),
            });
        }

        self.spawn()?;

        let deadline = Instant::now() + Duration::from_secs(self.config.timeout);
        loop {
            if let Ok(health) = client.probe().await {
                info!(
                    url = %client.base_url(),
                    version = %health.version,
                    "execution server is ready"
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ClientError::ServerStartFailed(format!(
                    "no healthy server at {} within {}s",
                    client.base_url(),
                    self.config.timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Detach a server process; the caller polls `/health` for readiness.
    fn spawn(&self) -> Result<()> {
        if self.config.container {
            info!(image = %self.config.container_image, "starting containerized execution server");
            let status = std::process::Command::new("docker")
                .args([
                    "run",
                    "--rm",
                    "-d",
                    "-p",
                    &format!("{0}:{0}", self.config.port),
                ])
                .arg(&self.config.container_image)
                .status()
                .map_err(|e| ClientError::ServerStartFailed(format!("docker run: {e}")))?;
            if !status.success() {
                return Err(ClientError::ServerStartFailed(format!(
                    "docker run exited with {status}"
                )));
            }
            return Ok(());
        }

        info!(port = self.config.port, "starting local execution server");
        let mut command = std::process::Command::new("plait-server");
        command
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if !self.config.api_key.is_empty() {
            command.arg("--api-key").arg(&self.config.api_key);
        }
        command
            .spawn()
            .map_err(|e| ClientError::ServerStartFailed(format!("spawn plait-server: {e}")))?;
        Ok(())
    }
}
