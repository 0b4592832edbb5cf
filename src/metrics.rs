//! Prometheus metrics exporter (§4.8 `GET /metrics`), grounded in the
//! teacher's `route_quality_monitor` binary pattern of serving a rendered
//! snapshot from an axum handler rather than running the exporter's own
//! background HTTP server.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return the handle used to
/// render a scrape response. Must be called exactly once per process,
/// before any `metrics::counter!`/`metrics::histogram!` call site fires.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("install prometheus recorder")
}
