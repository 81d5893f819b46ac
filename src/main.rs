use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, Mode};
use services::{
    lifecycle::LifecycleCoordinator, metadata_store::SqliteMetadataStore,
    object_store::DiskObjectStore, session_store::SqliteSessionStore,
};

/// Rows fetched per page by the maintenance sweeps.
const SWEEP_BATCH: u32 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting cloud-drive with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, cfg.max_db_connections).await?);

    db::run_migrations(&db).await?;

    // --- Initialize core services ---
    let sessions = SqliteSessionStore::new(db.clone(), cfg.session_ttl());
    let files = LifecycleCoordinator::new(
        Arc::new(SqliteMetadataStore::new(db.clone())),
        Arc::new(DiskObjectStore::new(&cfg.storage_dir)),
        cfg.store_timeout(),
    );

    match mode {
        Mode::Migrate => {
            tracing::info!("Database migration complete.");
            Ok(()) // exit after migration
        }
        Mode::Reconcile => {
            let report = files.reconcile(SWEEP_BATCH).await?;
            for orphan in &report.orphans {
                println!("{}\t{}\t{}", orphan.id, orphan.owner_id, orphan.storage_key);
            }
            tracing::info!(
                "Reconciliation scanned {} records, {} orphaned",
                report.scanned,
                report.orphans.len()
            );
            Ok(())
        }
        Mode::PurgeDeleted { older_than_days } => {
            let report = files
                .purge_deleted(chrono::Duration::days(older_than_days), SWEEP_BATCH)
                .await?;
            let expired = sessions.purge_expired().await?;
            tracing::info!(
                "Purged content of {} deleted files ({} failed), dropped {} expired sessions",
                report.purged,
                report.failed,
                expired
            );
            Ok(())
        }
        Mode::IssueSession { user_id } => {
            let token = sessions.create_session(user_id).await?;
            println!("{}", token);
            Ok(())
        }
        Mode::RevokeSession { token } => {
            if sessions.revoke(&token).await? {
                tracing::info!("Session revoked");
            } else {
                tracing::warn!("No such session");
            }
            Ok(())
        }
        Mode::Serve => serve(cfg, db, files, sessions).await,
    }
}

async fn serve(
    cfg: AppConfig,
    db: Arc<sqlx::SqlitePool>,
    files: LifecycleCoordinator,
    sessions: SqliteSessionStore,
) -> Result<()> {
    let state = state::AppState {
        files,
        sessions: Arc::new(sessions),
        db,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
