//! wardend: runs the governor, health monitors and patch coordinator, and
//! serves the read-only status API.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use wd_core::config::Config;
use wd_daemon::runtime::Runtime;
use wd_daemon::status_api::status_router;
use wd_harness::shutdown::{join_within, ShutdownSignal};
use wd_telemetry::logging::{init_logging, LogFormat};

/// How long in-flight status requests get once shutdown starts.
const API_DRAIN: Duration = Duration::from_secs(5);

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Single-host daemon lifecycle orchestrator.
#[derive(Parser)]
#[command(name = "wardend", version, about)]
struct Cli {
    /// Config file (defaults to ~/.warden/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as newline-delimited JSON.
    #[arg(long)]
    json_logs: bool,

    /// Validate the config, print the startup order and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path.clone())
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    let format = LogFormat::from_json_flag(cli.json_logs || config.logging.json);
    init_logging("wardend", &config.logging.level, format);

    let runtime = Runtime::from_config(&config)?;
    if cli.check {
        for (i, name) in runtime.governor().startup_order().iter().enumerate() {
            println!("{:>3}. {name}", i + 1);
        }
        return Ok(());
    }

    let shutdown = ShutdownSignal::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        ctrl_c.trigger("ctrl-c");
    });

    let bind_addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind status API on {bind_addr}"))?;
    let router = status_router(runtime.status_state());
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!(error = %e, "status API server error");
        }
    });
    info!(%bind_addr, "status API listening");

    runtime.run(&config, shutdown.clone()).await;

    // The loop can also end on its own; the API must follow it down.
    shutdown.trigger("runtime stopped");
    join_within("status-api", api_handle, API_DRAIN).await;
    info!(reason = shutdown.reason().as_deref().unwrap_or("unknown"), "wardend stopped");
    Ok(())
}
