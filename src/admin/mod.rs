//! Admin Control Plane (§4.8): a small `axum` HTTP server fronting the
//! Subscription Registry, Protection Event Sink, and Trust Store for
//! operator reads and admin-only suspend/resume control, plus a Prometheus
//! scrape endpoint. Router is split into a public group (login, health,
//! metrics) and a JWT-protected group (everything else).

pub mod api;

use crate::auth::{api as auth_api, middleware::auth_middleware, AuthState};
use crate::config::AdminConfig;
use crate::middleware::logging::request_logging_simple;
use anyhow::{Context, Result};
use api::AdminApiState;
use axum::{middleware as axum_mw, routing::{get, post}, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn router(
    auth_state: AuthState,
    admin_state: AdminApiState,
    prometheus_handle: PrometheusHandle,
) -> Router {
    let jwt_handler = auth_state.jwt_handler.clone();

    let auth_router = Router::new()
        .route("/admin/auth/login", post(auth_api::login))
        .with_state(auth_state);

    let protected_routes = Router::new()
        .route("/admin/subscriptions/:id", get(api::get_subscription))
        .route("/admin/subscriptions/:id/events", get(api::get_subscription_events))
        .route("/admin/subscriptions/:id/suspend", post(api::suspend_subscription))
        .route("/admin/subscriptions/:id/resume", post(api::resume_subscription))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler, auth_middleware))
        .with_state(admin_state);

    let public_routes = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_logging_simple))
}

pub async fn serve(
    config: AdminConfig,
    auth_state: AuthState,
    admin_state: AdminApiState,
    prometheus_handle: PrometheusHandle,
) -> Result<()> {
    let app = router(auth_state, admin_state, prometheus_handle);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("bind admin listener on {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "admin control plane listening");
    axum::serve(listener, app).await.context("admin server error")
}
