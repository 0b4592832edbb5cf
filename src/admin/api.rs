//! Admin control-plane routes (§4.8): operator read view plus the
//! admin-only suspend/resume transitions, gated by `auth_middleware` and
//! `extract_claims`.

use crate::auth::middleware::extract_claims;
use crate::auth::models::AdminRole;
use crate::registry::state::StateEvent;
use crate::registry::SqliteRegistry;
use crate::sink::ProtectionEventSink;
use crate::trust::store::TrustStore;
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AdminApiState {
    pub registry: Arc<SqliteRegistry>,
    pub sink: Arc<dyn ProtectionEventSink>,
    pub trust_store: Arc<TrustStore>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub subscription_id: String,
    pub subscriber_id: String,
    pub master_id: String,
    pub state: String,
    pub last_accepted_sequence: i64,
    pub trust_score: i32,
    pub max_price_deviation_pips: f64,
    pub max_ttl_ms: i64,
    pub max_lot: f64,
}

/// GET /admin/subscriptions/:id
pub async fn get_subscription(
    State(state): State<AdminApiState>,
    Path(subscription_id): Path<String>,
) -> Result<Json<SubscriptionView>, AdminApiError> {
    let snap = state
        .registry
        .snapshot(&subscription_id)
        .map_err(|_| AdminApiError::InternalError)?
        .ok_or(AdminApiError::NotFound)?;

    let trust_score = state
        .trust_store
        .get_score(&snap.subscriber_id)
        .map_err(|_| AdminApiError::InternalError)?;

    Ok(Json(SubscriptionView {
        subscription_id: snap.subscription_id.clone(),
        subscriber_id: snap.subscriber_id.clone(),
        master_id: snap.master_id.clone(),
        state: snap.state.as_str().to_string(),
        last_accepted_sequence: snap.last_accepted_sequence,
        trust_score,
        max_price_deviation_pips: snap.policy.max_price_deviation_pips,
        max_ttl_ms: snap.policy.max_ttl_ms,
        max_lot: snap.policy.max_lot,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_event_limit")]
    pub limit: u64,
    #[serde(default)]
    pub since_ms: i64,
}

fn default_event_limit() -> u64 {
    100
}

#[derive(Debug, Serialize)]
pub struct EventView {
    pub event_time_ms: i64,
    pub signal_sequence: i64,
    pub reason: String,
    pub observed_latency_ms: i64,
    pub observed_deviation_pips: Option<f64>,
    pub state_at_event: String,
}

/// GET /admin/subscriptions/:id/events?limit=N&since_ms=N
pub async fn get_subscription_events(
    State(state): State<AdminApiState>,
    Path(subscription_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventView>>, AdminApiError> {
    let events = state
        .sink
        .recent_for_subscription(&subscription_id, query.since_ms, query.limit)
        .map_err(|_| AdminApiError::InternalError)?;

    let views = events
        .into_iter()
        .map(|e| EventView {
            event_time_ms: e.event_time_ms,
            signal_sequence: e.signal_sequence,
            reason: e.reason.as_str().to_string(),
            observed_latency_ms: e.observed_latency_ms,
            observed_deviation_pips: e.observed_deviation_pips,
            state_at_event: e.state_at_event,
        })
        .collect();

    Ok(Json(views))
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub subscription_id: String,
    pub state: String,
}

/// POST /admin/subscriptions/:id/suspend — admin-only (§4.3 `ADMIN_SUSPEND`).
pub async fn suspend_subscription(
    State(state): State<AdminApiState>,
    Path(subscription_id): Path<String>,
    req: Request,
) -> Result<Json<TransitionResponse>, AdminApiError> {
    require_admin(&req)?;

    let snap = state
        .registry
        .apply_event(&subscription_id, StateEvent::AdminSuspend)
        .map_err(|_| AdminApiError::InternalError)?;

    info!(subscription_id = %subscription_id, "subscription suspended by operator");
    Ok(Json(TransitionResponse { subscription_id: snap.subscription_id, state: snap.state.as_str().to_string() }))
}

/// POST /admin/subscriptions/:id/resume — admin-only (§4.3 `ADMIN_RESUME`).
pub async fn resume_subscription(
    State(state): State<AdminApiState>,
    Path(subscription_id): Path<String>,
    req: Request,
) -> Result<Json<TransitionResponse>, AdminApiError> {
    require_admin(&req)?;

    let snap = state
        .registry
        .apply_event(&subscription_id, StateEvent::AdminResume)
        .map_err(|_| AdminApiError::InternalError)?;

    info!(subscription_id = %subscription_id, "subscription resumed by operator");
    Ok(Json(TransitionResponse { subscription_id: snap.subscription_id, state: snap.state.as_str().to_string() }))
}

fn require_admin(req: &Request) -> Result<(), AdminApiError> {
    let claims = extract_claims(req).ok_or(AdminApiError::Unauthorized)?;
    if claims.role != AdminRole::Admin {
        warn!(username = %claims.username, "operator attempted admin-only action");
        return Err(AdminApiError::Forbidden);
    }
    Ok(())
}

#[derive(Debug)]
pub enum AdminApiError {
    Unauthorized,
    Forbidden,
    NotFound,
    InternalError,
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AdminApiError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            AdminApiError::NotFound => (StatusCode::NOT_FOUND, "Subscription not found"),
            AdminApiError::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (status, message).into_response()
    }
}
