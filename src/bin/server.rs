//! Thinkring server: HTTP API for round-based ideation projects.
//!
//! Usage:
//!   THINKRING_DB=/path/to/thinkring.db THINKRING_BIND=0.0.0.0:8000 thinkring-server
//!
//! Or with args:
//!   thinkring-server --db /path/to/thinkring.db --bind 0.0.0.0:8000 --config thinkring.json

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use thinkring_lib::api::{build_router, AppState};
use thinkring_lib::config::{self, ServerConfig};
use thinkring_lib::db::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "thinkring-server")]
#[command(version, about = "Thinkring HTTP API", long_about = None)]
struct Args {
    /// Database path (default: walk up for .thinkring.db, then the data dir)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Bind address (default: 127.0.0.1:8000)
    #[arg(long)]
    bind: Option<String>,

    /// JSON config file
    #[arg(long, env = "THINKRING_CONFIG")]
    config: Option<PathBuf>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thinkring=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.apply_env() {
        tracing::error!(error = %e, "invalid environment");
        std::process::exit(1);
    }
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let db_path = config.resolve_db_path();
    if let Err(e) = config::ensure_database_dir(&db_path) {
        tracing::error!(error = %e, "failed to prepare database location");
        std::process::exit(1);
    }
    tracing::info!(path = %db_path.display(), "database");

    let db = match Database::new(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let secret = config.resolve_jwt_secret();
    let state = AppState::new(db, &config, &secret);
    let app = build_router(state, &config);

    let listener = match tokio::net::TcpListener::bind(&config.bind).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(bind = %config.bind, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(bind = %config.bind, "listening");
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
