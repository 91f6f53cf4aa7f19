mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use supper_api::{AppState, AppStateInner, Publishers};
use supper_db::Database;
use supper_events::InMemoryBroker;
use supper_types::ids;

use crate::config::{Config, LogFormat};

#[derive(Debug, Parser)]
#[command(name = "supper", about = "Collaborative meal-planning server")]
struct Args {
    /// Configuration document (.toml or .json). Defaults apply without one.
    #[arg(long, env = "SUPPER_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    init_logging(&config);
    config.validate()?;

    // Identifiers are useless without entropy; refuse to start.
    ids::ensure_entropy()?;

    let db = Arc::new(Database::open(&config.database.path, &config.database())?);
    let broker = InMemoryBroker::new(config.broker());
    let state: AppState = Arc::new(AppStateInner {
        db: Arc::clone(&db),
        config: config.api(),
        publishers: Publishers::from_provider(&broker),
        uploads: config.uploads(),
    });

    let cancel = CancellationToken::new();
    let workers = if config.services.workers.enabled {
        supper_workers::spawn(Arc::clone(&db), &broker, config.workers(), cancel.clone())?
    } else {
        info!("Workers disabled");
        Vec::new()
    };

    let app = supper_api::router(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(mode = %config.meta.run_mode, "Supper server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Workers finish their in-flight messages.
    cancel.cancel();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, join_workers(workers)).await;
    if drained.is_err() {
        warn!("Workers still busy after {:?}; exiting anyway", grace);
    }
    info!("Supper server stopped");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.observability.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn join_workers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("worker task ended abnormally: {}", e);
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM, or when something else cancels.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("listening for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("listening for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }
    info!("Shutdown requested");
}
