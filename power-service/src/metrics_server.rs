use std::net::SocketAddr;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and serve `/metrics`, `/health` and `/` on
/// `bind_addr`.
pub fn init(bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid metrics bind address '{bind_addr}'"))?;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;

    // Only the first call installs a recorder; later handles are dropped.
    let _ = PROM_HANDLE.set(handle);
    describe();

    tokio::spawn(async move {
        let app = router();

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "metrics and health endpoints listening");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

fn describe() {
    use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    describe_counter!("simulation_ticks_total", "Background simulator ticks, all households");
    describe_counter!("simulation_faults_total", "Ticks that fell back to the previous background value");
    describe_counter!("anomalies_started_total", "Anomalies started, by kind");
    describe_counter!("toggles_total", "Appliance toggles applied");
    describe_counter!("toggles_rejected_total", "Appliance toggles rejected");
    describe_counter!("samples_dropped_total", "Samples discarded by the buffer age cap");
    describe_counter!("samples_late_total", "Samples stamped inside an already closed window");
    describe_counter!("validation_toggle_rejected_total", "Feed toggles rejected before reaching the engine");
    describe_counter!("toggle_feed_parse_errors_total", "Toggle feed lines that failed to parse");
    describe_counter!("minute_readings_persisted_total", "Window readings written to storage");
    describe_counter!("minute_reading_retries_total", "Reading write retries");
    describe_counter!("minute_readings_parked_total", "Readings parked after exhausting retries");
    describe_gauge!("readings_pending_retry", "Readings waiting in the pending-retry set");
    describe_gauge!("households_registered", "Registered households");
    describe_histogram!("flush_duration_seconds", Unit::Seconds, "Window flush latency");
    describe_counter!("scores_computed_total", "Efficiency scores computed");
    describe_counter!("scores_insufficient_data_total", "Score requests rejected for insufficient data");
    describe_counter!("leaderboards_recorded_total", "Period leaderboards recorded by the score driver");
}

fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .route("/", get(root))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn root() -> Json<Value> {
    Json(json!({ "service": env!("CARGO_PKG_NAME"), "message": "running" }))
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}
