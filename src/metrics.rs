use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
        metrics::describe_histogram!(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        );
        metrics::describe_counter!("otp_sends_total", "Total number of OTP send attempts");
        metrics::describe_counter!(
            "otp_verifications_total",
            "Total number of OTP verify attempts, by outcome"
        );
        metrics::describe_counter!(
            "session_validations_total",
            "Total number of session validations, by outcome"
        );
        metrics::describe_counter!(
            "scoring_jobs_total",
            "Total number of scoring jobs processed, by outcome"
        );
        metrics::describe_histogram!(
            "scoring_job_duration_seconds",
            "Time spent scoring a single submission"
        );
        metrics::describe_gauge!(
            "prediction_queue_depth",
            "Approximate number of unscored submissions queued"
        );

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for the Prometheus scrape endpoint.
pub async fn metrics_handler(handle: axum::extract::State<PrometheusHandle>) -> impl IntoResponse {
    let body = handle.render();
    (StatusCode::OK, body)
}

/// Middleware to track HTTP request count/duration.
pub async fn track_request_metrics(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics::counter!("http_requests_total", 1);
    metrics::histogram!("http_request_duration_seconds", duration.as_secs_f64());

    response
}

pub fn record_otp_send(outcome: &'static str) {
    metrics::counter!("otp_sends_total", 1, "outcome" => outcome);
}

pub fn record_otp_verify(outcome: &'static str) {
    metrics::counter!("otp_verifications_total", 1, "outcome" => outcome);
}

pub fn record_session_validation(outcome: &'static str) {
    metrics::counter!("session_validations_total", 1, "outcome" => outcome);
}

pub fn record_scoring_job(outcome: &'static str, duration: Duration) {
    metrics::counter!("scoring_jobs_total", 1, "outcome" => outcome);
    metrics::histogram!("scoring_job_duration_seconds", duration.as_secs_f64());
}

pub fn record_queue_depth(depth: i64) {
    metrics::gauge!("prediction_queue_depth", depth as f64);
}
