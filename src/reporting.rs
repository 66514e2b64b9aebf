//! Optional HTTP surface: a liveness probe and a Prometheus scrape
//! endpoint, assembled as a small merged router with permissive CORS and a
//! tower-http trace layer. Also the outbound half: an effective-book
//! reporter that POSTs the current book to a configured URL on an interval.

use crate::control::KeeperState;
use crate::types::Order;
use axum::{response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct ReportingState {
    status: watch::Receiver<KeeperState>,
}

/// Installs the process-wide Prometheus recorder and returns a handle whose
/// `render()` produces the scrape body. Call once at startup.
pub fn install_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder can only be installed once per process")
}

/// Builds the reporting router: `GET /healthz` for liveness, `GET /metrics`
/// for Prometheus scraping. `status` is the receiving half of the channel
/// handed to `ControlLoop::with_status_channel`.
pub fn router(status: watch::Receiver<KeeperState>, metrics_handle: PrometheusHandle) -> Router {
    let state = ReportingState { status };

    Router::new()
        .route("/healthz", get(health_handler))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler(axum::extract::State(state): axum::extract::State<ReportingState>) -> impl IntoResponse {
    match *state.status.borrow() {
        KeeperState::Running => (axum::http::StatusCode::OK, "running"),
        KeeperState::Starting => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "starting"),
        KeeperState::Draining => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "draining"),
        KeeperState::Stopped => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "stopped"),
    }
}

/// Binds and serves the reporting router until the process exits. Spawned
/// as a background task alongside the control loop; its failure is logged
/// but never tears down the keeper itself.
pub async fn serve(addr: SocketAddr, router: Router) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "reporting endpoint failed to bind, continuing without it");
            return;
        }
    };
    info!(%addr, "reporting endpoint listening");
    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(error = %e, "reporting endpoint server error");
    }
}

/// Periodically POSTs the effective book (as reflected on `book`) to `url` as
/// JSON. Runs until the process exits; a send failure is logged at `warn`
/// and the loop continues on the next tick rather than tearing down the
/// keeper over a flaky reporting endpoint.
pub async fn report_task(url: String, interval: Duration, mut book: watch::Receiver<Vec<Order>>) {
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new());

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot = book.borrow_and_update().clone();
        match client.post(&url).json(&snapshot).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = %resp.status(), %url, "effective book report rejected by endpoint");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, %url, "failed to post effective book report"),
        }
    }
}

/// Increments the cycle counter and records cancel/place counts, called
/// once per control loop cycle.
pub fn record_cycle(cancels: usize, places: usize) {
    metrics::counter!("keeper_cycles_total").increment(1);
    metrics::counter!("keeper_cancels_total").increment(cancels as u64);
    metrics::counter!("keeper_places_total").increment(places as u64);
}

/// Records that a cycle found no usable price and skipped evaluation.
pub fn record_idle_cycle() {
    metrics::counter!("keeper_idle_cycles_total").increment(1);
}

/// Records `n` bands this cycle whose desired shortfall amount was clamped
/// below what the bands wanted, due to rate-limit headroom.
pub fn record_rate_limited(n: u64) {
    metrics::counter!("keeper_rate_limited_total").increment(n);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_receiver_reflects_last_sent_state() {
        let (tx, rx) = watch::channel(KeeperState::Starting);
        assert_eq!(*rx.borrow(), KeeperState::Starting);
        tx.send(KeeperState::Running).unwrap();
        assert_eq!(*rx.borrow(), KeeperState::Running);
    }
}
