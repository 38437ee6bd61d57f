//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{FromRequest, Query, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use relay_core::error::{RelayError, Result};
use relay_core::types::{Channel, IdentityKey, NotificationEvent, Recipient};
use relay_notify::{DirectoryUser, IncidentContext};

use crate::server::AppState;

/// Title given to inbound alert notifications.
const ALERT_TITLE: &str = "Incident alert";

// ═══════════════════════════════════════════════════════════════
// Inbound notify
// ═══════════════════════════════════════════════════════════════

/// Body of `/make_call` and `/send_sms`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
}

impl NotifyRequest {
    pub fn validate(&self) -> Result<()> {
        if !self.email.contains('@') {
            return Err(RelayError::InvalidEmail(self.email.clone()));
        }
        if self.message.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        Ok(())
    }

    fn incident(&self) -> IncidentContext {
        IncidentContext {
            alert_id: self.alert_id.clone(),
            instance: self.instance.clone(),
        }
    }
}

/// Accepts the notify body as JSON or as a urlencoded form.
pub struct NotifyPayload(pub NotifyRequest);

impl<S> FromRequest<S> for NotifyPayload
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            Json::<NotifyRequest>::from_request(req, state)
                .await
                .map(|Json(r)| Self(r))
                .map_err(IntoResponse::into_response)
        } else {
            Form::<NotifyRequest>::from_request(req, state)
                .await
                .map(|Form(r)| Self(r))
                .map_err(IntoResponse::into_response)
        }
    }
}

/// Map an error to its status and `{ "error": code }` body.
///
/// Grafana OnCall's own relay always answers `200` and reports failures only
/// in the body. Here the status reflects the failure too; set
/// `server.errors_as_ok` to get the `200` behaviour back. The body is the
/// same either way.
fn error_response(err: &RelayError) -> Response {
    error_body(error_status(err), err)
}

fn error_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidEmail(_) | RelayError::EmptyMessage => StatusCode::BAD_REQUEST,
        RelayError::IdentityNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::PhoneNotVerified(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::QueueFull(_) | RelayError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(status: StatusCode, err: &RelayError) -> Response {
    (status, Json(serde_json::json!({ "error": err.kind_code() }))).into_response()
}

/// Validate, resolve and enqueue. Delivery happens later on the dispatcher.
async fn notify(state: &AppState, req: NotifyRequest, channel: Channel) -> Result<String> {
    req.validate()?;
    let identity = state
        .resolver
        .resolve_for(&IdentityKey::Email(req.email.clone()), channel)
        .await?;

    let message = req.incident().decorate(&req.message);
    let mut event = NotificationEvent::push(Recipient::Resolved(Box::new(identity)), channel, ALERT_TITLE, &message);
    if let Some(alert_id) = req.alert_id.as_deref().filter(|id| !id.is_empty()) {
        event = event.with_id(alert_id);
    }
    let id = event.id.clone();
    state.dispatcher.enqueue(event)?;
    Ok(id)
}

async fn notify_response(state: &AppState, req: NotifyRequest, channel: Channel) -> Response {
    let email = req.email.clone();
    match notify(state, req, channel).await {
        Ok(id) => {
            tracing::info!("📨 {channel} for {email} queued [{id}]");
            (StatusCode::OK, Json(serde_json::json!({}))).into_response()
        }
        Err(e) => {
            tracing::warn!("📨 {channel} for {email} rejected: {e}");
            if state.errors_as_ok {
                error_body(StatusCode::OK, &e)
            } else {
                error_response(&e)
            }
        }
    }
}

/// `POST /make_call`
pub async fn make_call(State(state): State<Arc<AppState>>, NotifyPayload(req): NotifyPayload) -> Response {
    notify_response(&state, req, Channel::Phone).await
}

/// `POST /send_sms`
pub async fn send_sms(State(state): State<Arc<AppState>>, NotifyPayload(req): NotifyPayload) -> Response {
    notify_response(&state, req, Channel::Sms).await
}

// ═══════════════════════════════════════════════════════════════
// Directory sync
// ═══════════════════════════════════════════════════════════════

/// `POST /api/v1/users/sync` with a JSON user list.
pub async fn sync_users(
    State(state): State<Arc<AppState>>,
    Json(users): Json<Vec<DirectoryUser>>,
) -> Response {
    let directory = state.directory.clone();
    let outcome = tokio::task::spawn_blocking(move || directory.import_users(&users))
        .await
        .map_err(|e| RelayError::directory(format!("join: {e}")))
        .and_then(|r| r);
    match outcome {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!({ "ok": true, "report": report }))).into_response(),
        Err(e) => {
            tracing::error!("👥 User sync failed: {e}");
            error_response(&e)
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Health & stats
// ═══════════════════════════════════════════════════════════════

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dutyrelay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Counters from every stage of the pipeline.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (poller, schedules) = match &state.poller {
        Some(p) => (
            serde_json::to_value(p.stats()).unwrap_or_default(),
            p.registry().schedules(),
        ),
        None => (serde_json::Value::Null, Vec::new()),
    };
    Json(serde_json::json!({
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "poller": poller,
        "schedules": schedules,
        "dispatcher": state.dispatcher.stats(),
        "audit": state.audit.stats(),
        "identity_cache": {
            "size": state.resolver.cache_len(),
            "fallback_hits": state.resolver.fallback_hits(),
        },
    }))
}

/// Upper bound for `/api/v1/audit?limit=`.
const MAX_AUDIT_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize { 50 }

/// `GET /api/v1/audit`: latest delivery outcomes, newest first.
pub async fn recent_audit(State(state): State<Arc<AppState>>, Query(query): Query<AuditQuery>) -> Response {
    let Some(store) = state.audit_log.clone() else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "audit-disabled" }))).into_response();
    };
    let limit = query.limit.clamp(1, MAX_AUDIT_LIMIT);
    let outcome = tokio::task::spawn_blocking(move || Ok::<_, RelayError>((store.count()?, store.recent(limit)?)))
        .await
        .map_err(|e| RelayError::audit(format!("join: {e}")))
        .and_then(|r| r);
    match outcome {
        Ok((total, records)) => Json(serde_json::json!({ "total": total, "records": records })).into_response(),
        Err(e) => {
            tracing::error!("📝 Audit read failed: {e}");
            error_response(&e)
        }
    }
}
