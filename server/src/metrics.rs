use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_gauge!(
            "ws_connections_active",
            "Number of live client WebSocket connections"
        );
        metrics::describe_counter!(
            "ws_messages_dropped_total",
            "Outgoing messages dropped because a client queue was full"
        );
        metrics::describe_counter!(
            "bus_messages_relayed_total",
            "Bus messages fanned out to WebSocket clients"
        );
        metrics::describe_counter!(
            "transcripts_published_total",
            "Final transcripts published to the bus"
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

/// Handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(handle: axum::extract::State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}
