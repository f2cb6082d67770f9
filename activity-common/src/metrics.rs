use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const FETCHES: &str = "activity_fetches_total";
pub const EVENTS_CLASSIFIED: &str = "activity_events_classified_total";
pub const EVENTS_DUPLICATE: &str = "activity_events_duplicate_total";
pub const EVENTS_OUT_OF_WINDOW: &str = "activity_events_out_of_window_total";
pub const EVENTS_ACCEPTED: &str = "activity_events_accepted_total";
pub const NOTIFICATIONS: &str = "activity_notifications_total";
pub const CYCLE_DURATION: &str = "activity_cycle_duration_seconds";
pub const PERSIST_FAILURES: &str = "activity_state_persist_failures_total";
pub const SEEN_SET_SIZE: &str = "activity_seen_set_size";

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
/// The router is expected to have gone through `setup_metrics_routes` already,
/// with the worker's own health routes added by the caller.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Add the prometheus endpoint and request tracking to `router`; call it last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    // Cycles are dominated by one round of profile fetches, so buckets reach past
    // the fetch timeout.
    const CYCLE_SECONDS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];

    PrometheusBuilder::new()
        .set_buckets(CYCLE_SECONDS)
        .expect("bucket list is not empty")
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

/// Paths polled by the orchestrator and the scraper; counting them only adds noise.
const UNTRACKED_PATHS: &[&str] = &["/metrics", "/_liveness", "/_readiness"];

fn is_tracked_path(path: &str) -> bool {
    !UNTRACKED_PATHS.contains(&path)
}

/// Middleware to record some common HTTP metrics
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    if !is_tracked_path(&path) {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("activity_http_requests_total", &labels).increment(1);
    metrics::histogram!("activity_http_requests_duration_seconds", &labels).record(latency);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_and_scrape_paths_are_untracked() {
        assert!(!is_tracked_path("/metrics"));
        assert!(!is_tracked_path("/_liveness"));
        assert!(!is_tracked_path("/_readiness"));
        assert!(is_tracked_path("/"));
        assert!(is_tracked_path("/unknown"));
    }
}
