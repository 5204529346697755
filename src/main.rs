use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use taskledger::{
    AdaptorRegistry, AppConfig, MemoryDatabase, ServiceConfig, Services, SnapshotManager,
    build_router, storage::Seed,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "taskledger")]
#[command(about = "Job reconciliation and quota ledger service")]
struct Cli {
    /// Bind host, overrides APP_HOST
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides APP_PORT
    #[arg(long)]
    port: Option<u16>,

    /// JSON file with users, channels, plans and jobs to load at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Snapshot directory, overrides DATA_DIR
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("failed to load application configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    let snapshots = config.data_dir.as_ref().map(SnapshotManager::in_dir);
    let db = match &snapshots {
        Some(manager) => {
            let db = MemoryDatabase::restore(manager, config.lock_timeout).with_context(|| {
                format!("failed to restore snapshot {}", manager.path().display())
            })?;
            info!(path = %manager.path().display(), "store restored from snapshot");
            db
        }
        None => MemoryDatabase::with_lock_timeout(config.lock_timeout),
    };

    if let Some(path) = cli.seed {
        let seed = Seed::from_file(&path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        seed.apply(&db)
            .await
            .with_context(|| format!("failed to apply seed file {}", path.display()))?;
        info!(path = %path.display(), "seed data loaded");
    }

    let adaptors = AdaptorRegistry::with_builtin(config.reconciler.fetch_timeout);
    info!(platforms = ?adaptors.platforms(), "task adaptors registered");
    let mut services = Services::start(db.clone(), adaptors, ServiceConfig::from(&config));
    if config.update_task {
        services.start_reconciler();
    } else {
        warn!("UPDATE_TASK is disabled, jobs will not be reconciled");
    }

    let app = build_router(services.app_state());
    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, "taskledger started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    services
        .shutdown()
        .await
        .context("failed to stop background services")?;

    if let Some(manager) = &snapshots {
        let rows = db
            .save_snapshot(manager)
            .await
            .with_context(|| format!("failed to write snapshot {}", manager.path().display()))?;
        info!(rows, path = %manager.path().display(), "snapshot written");
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("taskledger=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
