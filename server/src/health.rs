use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mapper::MappingsLoader;
use crate::orchestrator::{ConnectionManager, SessionStore};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service_name: &'static str,
    api_version: &'static str,
    current_time_utc: DateTime<Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    active_sessions: usize,
    active_connections: usize,
    mappings_loaded: bool,
}

#[derive(Clone)]
pub struct HealthState {
    pub sessions: Arc<SessionStore>,
    pub manager: Arc<ConnectionManager>,
    pub loader: Arc<MappingsLoader>,
}

/// `GET /v1/healthz` — liveness plus a few cheap gauges.
pub async fn healthz(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service_name: "voicemesh",
        api_version: "v1",
        current_time_utc: Utc::now(),
        checks: HealthChecks {
            active_sessions: state.sessions.count(),
            active_connections: state.manager.count(),
            mappings_loaded: !state.loader.snapshot().is_empty(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_reports_ok_with_current_time() {
        let state = HealthState {
            sessions: Arc::new(SessionStore::new()),
            manager: Arc::new(ConnectionManager::new()),
            loader: MappingsLoader::new("/nonexistent/mappings.json"),
        };
        let Json(body) = healthz(State(state)).await;

        let rendered = serde_json::to_string(&body).unwrap();
        assert!(rendered.contains(r#""status":"ok""#));
        assert!((Utc::now() - body.current_time_utc).num_seconds() < 2);
        assert!(rendered.contains(r#""mappings_loaded":false"#));
    }
}
