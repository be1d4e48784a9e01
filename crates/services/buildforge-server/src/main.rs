//! Binary entry point for the HTTP/SSE transport (C7): wires up tracing,
//! metrics, the persistence store, and the axum router, then serves until
//! a shutdown signal arrives.

mod api;
mod auth;
mod error;
mod ratelimit;
mod state;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use buildforge_common::config::AppConfig;
use buildforge_core::model::snapshot::SnapshotRepo;
use buildforge_core::model::task::TaskRepo;
use buildforge_core::store::db::new_db_pool;
use buildforge_core::Runtime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use state::AppState;

fn setup_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum=debug"));
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let config = AppConfig::load().unwrap_or_else(|err| {
        tracing::warn!(%err, "falling back to default configuration");
        AppConfig::default()
    });

    let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/buildforge.db".to_string());
    let db = new_db_pool(&db_path).await?;

    let abandoned = TaskRepo::abandon_non_terminal(&db).await?;
    if abandoned > 0 {
        tracing::warn!(count = abandoned, "marked tasks abandoned after process restart");
    }

    let cleaned = SnapshotRepo::collect_garbage(&db).await?;
    if cleaned > 0 {
        tracing::info!(count = cleaned, "removed expired snapshots on startup");
    }

    let host: IpAddr = config.server.host.parse().unwrap_or_else(|_| IpAddr::from([0, 0, 0, 0]));
    let port = config.server.port;

    let gc_interval = std::time::Duration::from_secs(config.build.snapshot_gc_interval_secs);
    spawn_snapshot_gc(db.clone(), gc_interval);

    let runtime = Arc::new(Runtime::new(config, db).await?);
    let app_state = AppState::new(runtime, ratelimit::RateLimitConfig::new());
    let app = api::router(app_state);

    let addr = SocketAddr::new(host, port);
    tracing::info!(%addr, "buildforge-server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically sweeps expired snapshots, removing their on-disk storage
/// and marking them inactive (§3). Runs for the lifetime of the process.
fn spawn_snapshot_gc(db: buildforge_core::store::Db, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it, startup already swept once
        loop {
            ticker.tick().await;
            match SnapshotRepo::collect_garbage(&db).await {
                Ok(cleaned) if cleaned > 0 => {
                    tracing::info!(count = cleaned, "removed expired snapshots");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "snapshot garbage collection failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(%err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
