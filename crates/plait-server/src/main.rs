use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use plait_core::config::PlaitConfig;
use plait_kernel::{ProcessLauncher, SessionManager};

use plait_server::{build_router, AppState};

/// Multi-session code-execution server.
#[derive(Parser, Debug)]
#[command(name = "plait-server", version)]
struct Args {
    /// Bind host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Work root for session directories (overrides config).
    #[arg(long)]
    work_dir: Option<String>,

    /// Shared API key; empty disables auth (overrides config).
    #[arg(long)]
    api_key: Option<String>,

    /// Path to plait.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plait_server=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = PlaitConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        PlaitConfig::default()
    });
    if let Some(host) = args.host {
        config.execution.server.host = host;
    }
    if let Some(port) = args.port {
        config.execution.server.port = port;
    }
    if let Some(work_dir) = args.work_dir {
        config.session.work_dir = work_dir;
    }
    if let Some(api_key) = args.api_key {
        config.execution.server.api_key = api_key;
    }

    let launcher = Arc::new(ProcessLauncher::new(config.kernel.command.clone()));
    let manager = Arc::new(SessionManager::new(
        config.session.work_dir.clone(),
        launcher,
        config.kernel.clone(),
    ));
    let state = Arc::new(AppState::new(
        config.execution.server.clone(),
        Arc::clone(&manager),
    ));
    let router = build_router(Arc::clone(&state));

    let addr: SocketAddr = format!(
        "{}:{}",
        config.execution.server.host, config.execution.server.port
    )
    .parse()?;
    info!("plait execution server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await?;

    // Stop every kernel before the process exits.
    manager.stop_all().await;
    Ok(())
}
