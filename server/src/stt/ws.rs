//! Streaming STT WebSocket endpoint: `GET /v1/stream/{session_id}`.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;

use crate::bus::BusClient;
use crate::config::Settings;
use crate::stt::pipeline;
use crate::stt::pool::TranscriptionPool;

/// Everything a streaming session needs, passed in at startup.
#[derive(Clone)]
pub struct SttState {
    pub pool: TranscriptionPool,
    pub bus: Arc<BusClient>,
    pub settings: Arc<Settings>,
}

/// Upgrade and hand the socket to the per-session pipeline. The pipeline
/// owns the socket until the client disconnects or a fatal error closes it.
pub async fn stream_audio(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<SttState>,
) -> Response {
    ws.on_upgrade(move |socket| pipeline::run_session(socket, session_id, state))
}
