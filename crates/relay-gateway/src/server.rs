//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use relay_core::config::ServerConfig;
use relay_notify::{AuditSink, Dispatcher, IdentityResolver, SqliteAuditStore, SqliteDirectory};
use relay_roster::SchedulePoller;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub resolver: Arc<IdentityResolver>,
    /// Target of `/api/v1/users/sync`.
    pub directory: Arc<SqliteDirectory>,
    /// Absent when polling is disabled.
    pub poller: Option<Arc<SchedulePoller>>,
    pub audit: AuditSink,
    /// Backs `/api/v1/audit`; absent when the audit log is disabled.
    pub audit_log: Option<Arc<SqliteAuditStore>>,
    /// See `ServerConfig::errors_as_ok`.
    pub errors_as_ok: bool,
    pub start_time: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        // Inbound notify (OnCall outgoing webhooks)
        .route("/make_call", post(super::routes::make_call))
        .route("/send_sms", post(super::routes::send_sms))
        // Directory sync
        .route("/api/v1/users/sync", post(super::routes::sync_users))
        // Health & stats
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/stats", get(super::routes::stats))
        .route("/api/v1/audit", get(super::routes::recent_audit))
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Serve until `shutdown` flips, then finish in-flight requests.
pub async fn start(
    config: &ServerConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            tracing::info!("🌐 Gateway shutting down");
        })
        .await?;
    Ok(())
}
