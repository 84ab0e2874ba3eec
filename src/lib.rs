pub mod adapters;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod policy;
pub mod redaction;
pub mod relay;
pub mod session;
pub mod subscription;

use crate::adapters::messagebird::MessageBirdGateway;
use crate::api::{build_router, AppState};
use crate::config::PortalConfig;
use crate::db::Database;
use crate::errors::AppResult;
use crate::lifecycle::ComplaintService;
use crate::relay::NotificationRelay;
use crate::session::SessionManager;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const SESSION_PRUNE_INTERVAL_SECS: u64 = 60 * 60;

/// Opens the store and wires the service graph described by `config`.
pub fn build_state(config: &PortalConfig) -> AppResult<(AppState, Arc<Database>)> {
    config.validate()?;
    let db = Arc::new(Database::new(&config.database_path(), config.store_timeout())?);
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&db),
        config.session_ttl_hours,
        config.admin_emails.clone(),
    ));

    let gateway = MessageBirdGateway::new(config.sms.endpoint.clone(), config.sms.timeout())?;
    let relay = Arc::new(NotificationRelay::new(Arc::new(gateway), &config.sms));

    let mut service = ComplaintService::new(db.clone());
    if config.notify_on_status_change {
        if !relay.has_credentials() {
            tracing::warn!("status SMS enabled but gateway credentials are missing; sends will fail");
        }
        service = service.with_notifications(Arc::clone(&relay));
    }

    let state = AppState {
        service: Arc::new(service),
        sessions,
        relay,
    };
    Ok((state, db))
}

pub async fn serve(config: PortalConfig) -> anyhow::Result<()> {
    init_tracing(&config.log_dir()).map_err(anyhow::Error::msg)?;

    let (state, db) = build_state(&config).context("failed to initialise portal state")?;
    tracing::info!(database = %db.path().display(), "complaint store opened");

    tokio::spawn({
        let db = Arc::clone(&db);
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
            loop {
                interval.tick().await;
                match db.prune_expired_sessions(chrono::Utc::now()) {
                    Ok(0) => {}
                    Ok(pruned) => tracing::info!(pruned, "expired sessions pruned"),
                    Err(error) => tracing::warn!(error = %error, "session maintenance failed"),
                }
            }
        }
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!(bind_addr = %config.bind_addr, "grievance portal listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("grievance portal stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "portal.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
