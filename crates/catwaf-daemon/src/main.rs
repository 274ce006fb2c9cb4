//! `CatWAF` Daemon
//!
//! Runs the control plane: job worker, reload coordinator, maintenance
//! loop and the admin HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use catwaf_core::config::load_config;
use catwaf_core::tracing_init::{default_filter, init_tracing};
use catwaf_daemon::api::{AppState, build_router};
use catwaf_daemon::gateway::ProcessGateway;
use catwaf_daemon::maintenance::spawn_maintenance;
use catwaf_daemon::reload::{ReloadCoordinator, ReloadPolicy};
use catwaf_daemon::storage::Database;
use catwaf_daemon::ControlPlane;

#[derive(Parser, Debug)]
#[command(name = "catwaf-daemon")]
#[command(version, about = "CatWAF control plane daemon")]
struct Args {
    /// Config file (defaults to /etc/catwaf/catwaf.toml when present)
    #[arg(long, short, env = "CATWAF_CONFIG")]
    config: Option<PathBuf>,

    /// Admin API bind address
    #[arg(long, env = "CATWAF_LISTEN_ADDR")]
    addr: Option<SocketAddr>,

    /// Database file path
    #[arg(long, env = "CATWAF_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "CATWAF_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CATWAF_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.daemon.listen_addr = addr;
    }
    if let Some(path) = args.db_path {
        config.daemon.database_path = Some(path);
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    config.daemon.log_json |= args.log_json;

    init_tracing(
        &default_filter("catwaf_daemon", &config.daemon.log_level),
        config.daemon.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.daemon.listen_addr,
        reload_mode = config.reload.mode.as_str(),
        auth = config.daemon.api_key.is_some(),
        "Starting catwaf-daemon"
    );
    if config.daemon.api_key.is_none() {
        warn!("No API key configured, admin API is unauthenticated");
    }

    let db_path = match &config.daemon.database_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let policy = ReloadPolicy::from_config(&config.reload)?;
    let (coordinator, reload) = ReloadCoordinator::new(
        policy,
        Duration::from_millis(config.reload.debounce_ms),
        ProcessGateway::new(),
    );
    let reload_handle = coordinator.spawn(shutdown_rx.clone());

    let plane = ControlPlane::assemble(db, &config, reload);

    let worker = plane.worker(Duration::from_millis(config.queue.poll_interval_ms));
    worker.recover().await?;
    let worker_handle = worker.spawn(shutdown_rx.clone());

    let maintenance_handle = spawn_maintenance(
        plane.bans.clone(),
        plane.certs.clone(),
        config.maintenance.clone(),
        shutdown_rx,
    );

    let app = build_router(AppState::new(plane, config.daemon.api_key.as_deref()));
    let listener = tokio::net::TcpListener::bind(config.daemon.listen_addr).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // The `true` parameter unsets $NOTIFY_SOCKET so the reload command and
    // the certificate client don't inherit it.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    info!(addr = %config.daemon.listen_addr, "Admin API ready");

    let shutdown_signal = async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Stop the background tasks
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    let _ = maintenance_handle.await;
    let _ = reload_handle.await;

    info!("Daemon stopped");
    Ok(())
}

/// Default database path: ~/.catwaf/catwaf.db
fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".catwaf").join("catwaf.db"))
}
