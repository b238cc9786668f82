//! Per-client WebSocket connection.
//!
//! Each connection owns a bounded outgoing queue and three tasks: sender
//! (drains the queue), receiver (dispatches client messages), heartbeat
//! (periodic ping). Enqueueing never blocks; a full queue drops the message,
//! and more than [`MAX_QUEUE_DROPS`] drops over the connection lifetime
//! force-closes with 1011 "backpressure". Close is idempotent and tears all
//! three tasks down before the socket is closed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{ClientMessage, ControlAction, Outgoing, ServiceState};

/// Queue drops tolerated before the connection is closed for backpressure.
pub const MAX_QUEUE_DROPS: u32 = 3;

/// How long teardown waits for a task before abandoning it.
const TASK_JOIN_GRACE: Duration = Duration::from_secs(2);

/// Sender dequeue timeout, so liveness is re-checked on a quiet queue.
const SENDER_POLL: Duration = Duration::from_secs(1);

type SttProxy = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

pub struct ClientConnection {
    pub conn_id: Uuid,
    pub session_id: Uuid,
    pub client_id: String,
    outgoing: mpsc::Sender<String>,
    queue_capacity: usize,
    dropped: AtomicU32,
    closed: AtomicBool,
    close_reason: OnceLock<(u16, String)>,
    cancel: CancellationToken,
    stt_ws: tokio::sync::Mutex<Option<SttProxy>>,
}

impl ClientConnection {
    /// Build a connection and hand back the queue's receiving end for the
    /// sender task.
    pub fn new(session_id: Uuid, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        // mpsc needs capacity >= 1; a configured capacity of zero is honored
        // by dropping every enqueue instead.
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn_id = Uuid::new_v4();
        let conn = Arc::new(Self {
            conn_id,
            session_id,
            client_id: format!("client-{}", &conn_id.to_string()[..8]),
            outgoing: tx,
            queue_capacity,
            dropped: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            close_reason: OnceLock::new(),
            cancel: CancellationToken::new(),
            stt_ws: tokio::sync::Mutex::new(None),
        });
        (conn, rx)
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Queue a serialized envelope for delivery. Never blocks: a full queue
    /// drops the message and counts it.
    pub fn enqueue(&self, message: String) {
        if !self.is_active() {
            debug!(client = self.client_id, "Enqueue on inactive connection ignored");
            return;
        }
        if self.queue_capacity == 0 {
            self.record_drop();
            return;
        }
        match self.outgoing.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.record_drop(),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::counter!("ws_messages_dropped_total", 1);
        warn!(
            client = self.client_id,
            session = %self.session_id,
            dropped,
            "Outgoing queue full, message dropped"
        );
        if dropped > MAX_QUEUE_DROPS {
            error!(
                client = self.client_id,
                session = %self.session_id,
                "Persistent backpressure, disconnecting client"
            );
            self.close(close_code::ERROR, "backpressure");
        }
    }

    /// Mark the connection closed and cancel its tasks. Idempotent: only the
    /// first caller's code/reason reaches the close frame.
    pub fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.close_reason.set((code, reason.to_string()));
        info!(
            client = self.client_id,
            session = %self.session_id,
            code,
            reason,
            "Closing connection"
        );
        self.cancel.cancel();
    }

    pub fn close_frame(&self) -> (u16, String) {
        self.close_reason
            .get()
            .cloned()
            .unwrap_or((close_code::NORMAL, String::new()))
    }

    /// Forward decoded audio bytes to the STT socket for this session,
    /// connecting lazily on first use.
    async fn forward_audio(&self, settings: &Settings, audio: Vec<u8>) -> anyhow::Result<()> {
        let mut guard = self.stt_ws.lock().await;
        if guard.is_none() {
            let url = format!(
                "{}/{}",
                settings.stt_service_ws_url.trim_end_matches('/'),
                self.session_id
            );
            let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
            debug!(client = self.client_id, url, "Opened STT proxy socket");
            *guard = Some(ws);
        }
        let proxy = guard.as_mut().expect("proxy just initialized");
        if let Err(e) = proxy
            .send(tokio_tungstenite::tungstenite::Message::Binary(audio))
            .await
        {
            // Drop the broken proxy so the next chunk reconnects.
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the upstream STT socket, if one was opened.
    pub async fn release_stt_proxy(&self) {
        if let Some(mut proxy) = self.stt_ws.lock().await.take() {
            let _ = proxy.close(None).await;
            debug!(client = self.client_id, "Released STT proxy socket");
        }
    }
}

/// Run a registered connection to completion: spawn the three tasks, await
/// the receiver, then tear everything down and close the socket.
pub async fn run(
    socket: WebSocket,
    conn: Arc<ClientConnection>,
    queue_rx: mpsc::Receiver<String>,
    settings: Arc<Settings>,
) {
    let (sink, stream) = socket.split();
    let sink: WsSink = Arc::new(tokio::sync::Mutex::new(sink));

    let sender = tokio::spawn(sender_task(conn.clone(), sink.clone(), queue_rx));
    let heartbeat = tokio::spawn(heartbeat_task(
        conn.clone(),
        sink.clone(),
        settings.heartbeat_interval(),
    ));
    let receiver = tokio::spawn(receiver_task(conn.clone(), stream, settings));

    // The receiver observes the client going away; everything else follows.
    let _ = receiver.await;
    conn.close(close_code::NORMAL, "client disconnect");

    for task in [sender, heartbeat] {
        if tokio::time::timeout(TASK_JOIN_GRACE, task).await.is_err() {
            warn!(client = conn.client_id, "Connection task did not stop in time");
        }
    }

    let (code, reason) = conn.close_frame();
    let _ = sink
        .lock()
        .await
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
    conn.release_stt_proxy().await;
    info!(client = conn.client_id, session = %conn.session_id, "Connection cleaned up");
}

async fn sender_task(
    conn: Arc<ClientConnection>,
    sink: WsSink,
    mut queue_rx: mpsc::Receiver<String>,
) {
    debug!(client = conn.client_id, "Sender task started");
    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            polled = tokio::time::timeout(SENDER_POLL, queue_rx.recv()) => {
                match polled {
                    Err(_) => continue, // dequeue timeout: re-check liveness
                    Ok(Some(json)) => {
                        if sink.lock().await.send(Message::Text(json.into())).await.is_err() {
                            debug!(client = conn.client_id, "Write failed, client gone");
                            conn.close(close_code::NORMAL, "write failed");
                            break;
                        }
                    }
                    Ok(None) => break,
                }
            }
        }
    }
    debug!(client = conn.client_id, "Sender task stopped");
}

async fn receiver_task(
    conn: Arc<ClientConnection>,
    mut stream: SplitStream<WebSocket>,
    settings: Arc<Settings>,
) {
    debug!(client = conn.client_id, "Receiver task started");
    let receive_timeout = settings.receive_timeout();
    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            polled = tokio::time::timeout(receive_timeout, stream.next()) => {
                match polled {
                    Err(_) => {
                        // Soft timeout: the heartbeat keeps the transport
                        // honest, so a quiet client is fine.
                        debug!(client = conn.client_id, "Receive timeout, still active");
                        continue;
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        handle_client_text(&conn, &settings, text.as_str()).await;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        conn.close(close_code::NORMAL, "client disconnect");
                        break;
                    }
                    Ok(Some(Ok(_))) => {} // binary/ping/pong: nothing to do
                    Ok(Some(Err(e))) => {
                        debug!(client = conn.client_id, error = %e, "Receive failed");
                        conn.close(close_code::NORMAL, "receive failed");
                        break;
                    }
                }
            }
        }
    }
    debug!(client = conn.client_id, "Receiver task stopped");
}

async fn heartbeat_task(conn: Arc<ClientConnection>, sink: WsSink, period: Duration) {
    debug!(client = conn.client_id, "Heartbeat task started");
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = interval.tick() => {
                if sink.lock().await.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!(client = conn.client_id, "Heartbeat ping failed, connection lost");
                    conn.close(close_code::NORMAL, "connection lost");
                    break;
                }
            }
        }
    }
    debug!(client = conn.client_id, "Heartbeat task stopped");
}

/// Parse and dispatch one client text frame. Parse errors and unknown kinds
/// are logged, never fatal.
async fn handle_client_text(conn: &Arc<ClientConnection>, settings: &Settings, text: &str) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                client = conn.client_id,
                error = %e,
                "Unparseable or unknown client message"
            );
            return;
        }
    };

    match parsed {
        ClientMessage::AudioChunk { data_b64, .. } => {
            let audio = match BASE64.decode(data_b64.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(client = conn.client_id, error = %e, "Invalid audio chunk encoding");
                    return;
                }
            };
            if let Err(e) = conn.forward_audio(settings, audio).await {
                error!(client = conn.client_id, error = %e, "Failed to forward audio to STT");
            }
        }
        ClientMessage::EditComponent { spec_id, .. } => {
            info!(client = conn.client_id, spec = %spec_id, "Applying component edit");
            conn.enqueue(
                Outgoing::status(
                    "orchestrator",
                    ServiceState::Up,
                    format!("edit_applied:{spec_id}"),
                )
                .to_json(),
            );
        }
        ClientMessage::ControlSession { action, .. } => {
            info!(client = conn.client_id, ?action, "Session control action");
            conn.enqueue(
                Outgoing::status(
                    "orchestrator",
                    ServiceState::Up,
                    format!("action:{}", action_name(action)),
                )
                .to_json(),
            );
        }
        ClientMessage::PingCustom => {
            conn.enqueue(Outgoing::status("orchestrator", ServiceState::Up, "pong_custom").to_json());
        }
    }
}

fn action_name(action: ControlAction) -> &'static str {
    match action {
        ControlAction::StartListening => "start_listening",
        ControlAction::StopListening => "stop_listening",
        ControlAction::RequestMockupNow => "request_mockup_now",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_preserves_order_until_full_then_drops() {
        let (conn, mut rx) = ClientConnection::new(Uuid::new_v4(), 2);
        for i in 0..6 {
            conn.enqueue(format!("m{i}"));
        }
        assert_eq!(rx.try_recv().unwrap(), "m0");
        assert_eq!(rx.try_recv().unwrap(), "m1");
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.dropped_count(), 4);
    }

    #[test]
    fn fourth_drop_forces_backpressure_close() {
        let (conn, _rx) = ClientConnection::new(Uuid::new_v4(), 1);
        conn.enqueue("kept".to_string());
        for _ in 0..3 {
            conn.enqueue("dropped".to_string());
        }
        assert!(conn.is_active(), "three drops are tolerated");

        conn.enqueue("dropped".to_string());
        assert!(!conn.is_active());
        let (code, reason) = conn.close_frame();
        assert_eq!(code, close_code::ERROR);
        assert_eq!(reason, "backpressure");
    }

    #[test]
    fn zero_capacity_queue_drops_everything() {
        let (conn, mut rx) = ClientConnection::new(Uuid::new_v4(), 0);
        conn.enqueue("a".to_string());
        conn.enqueue("b".to_string());
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.dropped_count(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = ClientConnection::new(Uuid::new_v4(), 4);
        conn.close(close_code::ERROR, "backpressure");
        conn.close(close_code::NORMAL, "later");
        let (code, reason) = conn.close_frame();
        assert_eq!(code, close_code::ERROR);
        assert_eq!(reason, "backpressure");
        assert!(!conn.is_active());
    }

    #[test]
    fn enqueue_after_close_is_ignored() {
        let (conn, mut rx) = ClientConnection::new(Uuid::new_v4(), 4);
        conn.close(close_code::NORMAL, "done");
        conn.enqueue("late".to_string());
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.dropped_count(), 0);
    }

    #[test]
    fn drop_counter_is_monotonic() {
        let (conn, _rx) = ClientConnection::new(Uuid::new_v4(), 0);
        let mut last = 0;
        // Four drops: the last one also trips the backpressure close.
        for _ in 0..4 {
            conn.enqueue("x".to_string());
            let now = conn.dropped_count();
            assert!(now > last);
            last = now;
        }
        assert!(!conn.is_active());
    }
}
