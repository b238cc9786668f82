//! Redis pub/sub bus client.
//!
//! Publishing goes through a lazily created `ConnectionManager` (connects on
//! demand, reconnects on its own). Subscribing spawns a background task that
//! owns a dedicated pub/sub connection and re-establishes it after any
//! transport failure; a `CancellationToken` stops the loop promptly. Handler
//! failures are logged and never tear down the subscription.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between reconnect attempts after a failed connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Poll timeout so the stop signal is honored even on a quiet bus.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// How long `close` waits for the subscriber task before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Receives raw bus messages for a set of subscribed channels.
#[async_trait::async_trait]
pub trait BusHandler: Send + Sync + 'static {
    async fn handle(&self, channel: &str, payload: &[u8]) -> anyhow::Result<()>;
}

pub struct BusClient {
    client: redis::Client,
    publisher: tokio::sync::Mutex<Option<ConnectionManager>>,
    shutdown: CancellationToken,
}

impl BusClient {
    /// Validates the URL; no connection is made until first use.
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            publisher: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Publish raw bytes to a channel, connecting on demand.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            let manager = self.client.get_connection_manager().await?;
            *guard = Some(manager);
        }
        let manager = guard.as_mut().expect("publisher just initialized");
        manager.publish::<_, _, ()>(channel, payload).await?;
        debug!(channel, bytes = payload.len(), "Published bus message");
        Ok(())
    }

    /// Serialize a value and publish it.
    pub async fn publish_json<T: serde::Serialize>(
        &self,
        channel: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish(channel, &payload).await
    }

    /// Start the background subscriber for `channels`, delivering every
    /// payload message to `handler`. The returned task runs until `close`
    /// fires the client's stop signal.
    pub fn subscribe(&self, channels: Vec<String>, handler: Arc<dyn BusHandler>) -> JoinHandle<()> {
        let cancel = self.shutdown.child_token();
        let client = self.client.clone();
        tokio::spawn(subscriber_loop(client, channels, handler, cancel))
    }

    /// Cancel the subscriber and drop the publish connection. Safe to call
    /// repeatedly. Callers holding the handle from `subscribe` should give
    /// it the shutdown grace before abandoning it.
    pub async fn close(&self) {
        self.shutdown.cancel();
        *self.publisher.lock().await = None;
    }

    /// Await a subscriber handle, abandoning it after the shutdown grace.
    pub async fn join_subscriber(task: JoinHandle<()>) {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("Timed out waiting for bus subscriber to stop");
        }
    }
}

async fn subscriber_loop(
    client: redis::Client,
    channels: Vec<String>,
    handler: Arc<dyn BusHandler>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("Bus subscriber cancelled");
            return;
        }

        let mut pubsub = match client.get_async_pubsub().await {
            Ok(ps) => ps,
            Err(e) => {
                warn!(error = %e, "Bus connection failed, retrying in {:?}", RECONNECT_DELAY);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                }
            }
        };

        if let Err(e) = pubsub.subscribe(&channels).await {
            warn!(error = %e, "Bus subscribe failed, reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
            }
        }
        info!(?channels, "Subscribed to bus channels");

        // `on_message` already filters out subscription confirmations, so
        // everything observed here is a payload message.
        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Bus subscriber cancelled");
                    return;
                }
                polled = tokio::time::timeout(POLL_TIMEOUT, stream.next()) => {
                    match polled {
                        Err(_) => continue, // poll timeout; re-check stop signal
                        Ok(Some(msg)) => {
                            let channel = msg.get_channel_name().to_string();
                            let payload = msg.get_payload_bytes().to_vec();
                            if let Err(e) = handler.handle(&channel, &payload).await {
                                error!(channel, error = %e, "Bus handler failed");
                            }
                        }
                        Ok(None) => {
                            warn!("Bus pub/sub connection lost, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(AtomicUsize);

    #[async_trait::async_trait]
    impl BusHandler for CountingHandler {
        async fn handle(&self, _channel: &str, _payload: &[u8]) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(BusClient::new("not-a-redis-url").is_err());
    }

    #[test]
    fn valid_url_does_not_connect_eagerly() {
        // Nothing listens on this port; construction must still succeed.
        assert!(BusClient::new("redis://127.0.0.1:1/0").is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let bus = BusClient::new("redis://127.0.0.1:1/0").unwrap();
        bus.close().await;
        bus.close().await;
    }

    #[tokio::test]
    async fn subscriber_stops_on_close_without_broker() {
        let bus = BusClient::new("redis://127.0.0.1:1/0").unwrap();
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let task = bus.subscribe(vec!["transcripts".to_string()], handler.clone());
        // The loop is stuck in its reconnect backoff; close must end it.
        bus.close().await;
        assert!(tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .is_ok());
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);
    }
}
