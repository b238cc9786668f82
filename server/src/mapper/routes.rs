//! Design-mapper REST surface: `POST /v1/map`, `POST /v1/reload`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{error, info};

use super::loader::MappingsLoader;
use super::merge::{map_request, MapRequest, MapResponse};

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub message: String,
}

pub async fn map_design_tokens(
    State(loader): State<Arc<MappingsLoader>>,
    Json(request): Json<MapRequest>,
) -> Json<MapResponse> {
    info!(
        styles = ?request.styles,
        brands = ?request.brand_refs,
        component = ?request.component,
        "Mapping request"
    );
    let snapshot = loader.snapshot();
    Json(map_request(&snapshot, &request))
}

pub async fn reload_mappings(
    State(loader): State<Arc<MappingsLoader>>,
) -> (StatusCode, Json<ReloadResponse>) {
    match loader.reload() {
        Ok(true) => (
            StatusCode::OK,
            Json(ReloadResponse {
                status: "success",
                message: "Mappings reloaded".to_string(),
            }),
        ),
        Ok(false) => (
            StatusCode::OK,
            Json(ReloadResponse {
                status: "success",
                message: "Mappings unchanged".to_string(),
            }),
        ),
        Err(e) => {
            error!(error = %e, "Mappings reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReloadResponse {
                    status: "error",
                    message: e.to_string(),
                }),
            )
        }
    }
}
