//! Session REST surface: create, summary, delete.
//!
//! Sessions are in-memory only; nothing survives the process. Creation mints
//! the JWT whose subject gates the WebSocket admission for that session.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::TokenService;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub transcript_snippets: Vec<String>,
    pub generated_components_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: Uuid,
    pub token: Token,
}

/// Active-sessions table, shared between the REST handlers and admission.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, SessionSummary>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> SessionSummary {
        let now = Utc::now();
        let summary = SessionSummary {
            session_id: Uuid::new_v4(),
            created_at: now,
            last_activity_at: now,
            transcript_snippets: Vec::new(),
            generated_components_count: 0,
        };
        self.sessions.insert(summary.session_id, summary.clone());
        summary
    }

    /// Fetch a summary, refreshing its last-activity stamp.
    pub fn touch(&self, session_id: &Uuid) -> Option<SessionSummary> {
        self.sessions.get_mut(session_id).map(|mut entry| {
            entry.last_activity_at = Utc::now();
            entry.clone()
        })
    }

    pub fn remove(&self, session_id: &Uuid) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

// MARK: - Handlers

pub async fn create_session(
    State(store): State<Arc<SessionStore>>,
    State(tokens): State<TokenService>,
) -> Result<(StatusCode, Json<SessionCreateResponse>), ApiError> {
    let summary = store.create();
    let access_token = tokens
        .issue(&summary.session_id.to_string(), &["session:active"])
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(session = %summary.session_id, "Session created");

    Ok((
        StatusCode::CREATED,
        Json(SessionCreateResponse {
            session_id: summary.session_id,
            token: Token {
                access_token,
                token_type: "bearer".to_string(),
            },
        }),
    ))
}

pub async fn get_session_summary(
    State(store): State<Arc<SessionStore>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    store
        .touch(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session '{session_id}' not found")))
}

pub async fn delete_session(
    State(store): State<Arc<SessionStore>>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if store.remove(&session_id) {
        info!(session = %session_id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Session '{session_id}' not found"
        )))
    }
}
