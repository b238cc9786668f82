//! Client WebSocket endpoint: `GET /v1/ws/{session_id}?token=...`.
//!
//! Admission runs before any session work: the token must verify and its
//! subject must equal the path's session id, otherwise the socket closes
//! with 1008 and nothing is registered.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Claims, TokenService};
use crate::config::Settings;
use crate::orchestrator::connection::{self, ClientConnection};
use crate::orchestrator::manager::ConnectionManager;
use crate::orchestrator::sessions::SessionStore;

#[derive(Clone)]
pub struct OrchestratorState {
    pub manager: Arc<ConnectionManager>,
    pub tokens: TokenService,
    pub sessions: Arc<SessionStore>,
    pub settings: Arc<Settings>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub token: Option<String>,
}

/// Validate admission for a session socket.
pub fn admit(
    session_id: &Uuid,
    token: Option<&str>,
    tokens: &TokenService,
) -> Result<Claims, &'static str> {
    let token = token.ok_or("Missing authentication token")?;
    let claims = tokens
        .verify(token)
        .map_err(|_| "Invalid or expired token")?;
    if claims.sub != session_id.to_string() {
        return Err("Token subject mismatch");
    }
    Ok(claims)
}

pub async fn client_socket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<Uuid>,
    Query(auth): Query<AuthQuery>,
    State(state): State<OrchestratorState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        match admit(&session_id, auth.token.as_deref(), &state.tokens) {
            Err(reason) => {
                warn!(session = %session_id, reason, "WebSocket admission rejected");
                reject(socket, reason).await;
            }
            Ok(_claims) => {
                serve_client(socket, session_id, state).await;
            }
        }
    })
}

/// Policy-violation close, sent before any registration happens.
async fn reject(mut socket: WebSocket, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn serve_client(socket: WebSocket, session_id: Uuid, state: OrchestratorState) {
    let (conn, queue_rx) =
        ClientConnection::new(session_id, state.settings.websocket_max_queue_size);
    info!(client = conn.client_id, session = %session_id, "WebSocket admitted");

    state.manager.register(conn.clone());
    connection::run(socket, conn.clone(), queue_rx, state.settings.clone()).await;
    state.manager.deregister(&conn);
    state.sessions.touch(&session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn token_service(secret: &str) -> TokenService {
        let settings = Settings::from_lookup(|key| match key {
            "JWT_SECRET_KEY" => Some(secret.to_string()),
            _ => None,
        });
        TokenService::new(&settings).unwrap()
    }

    #[test]
    fn missing_token_is_rejected() {
        let tokens = token_service("testsecret");
        let reason = admit(&Uuid::new_v4(), None, &tokens).unwrap_err();
        assert_eq!(reason, "Missing authentication token");
    }

    #[test]
    fn invalid_token_is_rejected() {
        let tokens = token_service("testsecret");
        let reason = admit(&Uuid::new_v4(), Some("garbage"), &tokens).unwrap_err();
        assert_eq!(reason, "Invalid or expired token");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let session_id = Uuid::new_v4();
        let forged = token_service("other")
            .issue(&session_id.to_string(), &[])
            .unwrap();
        let tokens = token_service("testsecret");
        let reason = admit(&session_id, Some(&forged), &tokens).unwrap_err();
        assert_eq!(reason, "Invalid or expired token");
    }

    #[test]
    fn subject_mismatch_is_rejected() {
        let tokens = token_service("testsecret");
        let token = tokens.issue(&Uuid::new_v4().to_string(), &[]).unwrap();
        let reason = admit(&Uuid::new_v4(), Some(&token), &tokens).unwrap_err();
        assert_eq!(reason, "Token subject mismatch");
    }

    #[test]
    fn matching_subject_is_admitted() {
        let tokens = token_service("testsecret");
        let session_id = Uuid::new_v4();
        let token = tokens
            .issue(&session_id.to_string(), &["session:active"])
            .unwrap();
        let claims = admit(&session_id, Some(&token), &tokens).unwrap();
        assert_eq!(claims.sub, session_id.to_string());
    }
}
