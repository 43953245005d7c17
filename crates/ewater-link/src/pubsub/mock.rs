//! Mock pub/sub client for testing

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use super::{ConnectionStatus, PubSubClient, PubSubError, PubSubMessage};

/// In-memory broker client
///
/// Records subscriptions and publications; messages and status changes are
/// injected by the test.
pub struct MockPubSubClient {
    status_tx: watch::Sender<ConnectionStatus>,
    messages_tx: broadcast::Sender<PubSubMessage>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<PubSubMessage>>,
}

impl MockPubSubClient {
    /// A client that is already connected.
    pub fn connected() -> Self {
        Self::with_status(ConnectionStatus::Connected)
    }

    pub fn with_status(status: ConnectionStatus) -> Self {
        let (status_tx, _) = watch::channel(status);
        let (messages_tx, _) = broadcast::channel(256);
        Self {
            status_tx,
            messages_tx,
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    /// Deliver a message as if it came from the broker.
    pub fn inject(&self, topic: &str, payload: &str) {
        let _ = self.messages_tx.send(PubSubMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn published(&self) -> Vec<PubSubMessage> {
        self.published.lock().clone()
    }

    fn ensure_connected(&self) -> Result<(), PubSubError> {
        match *self.status_tx.borrow() {
            ConnectionStatus::Connected => Ok(()),
            _ => Err(PubSubError::NotConnected),
        }
    }
}

#[async_trait]
impl PubSubClient for MockPubSubClient {
    async fn subscribe(&self, topic: &str) -> Result<(), PubSubError> {
        self.ensure_connected()?;
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PubSubError> {
        self.ensure_connected()?;
        self.published.lock().push(PubSubMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.messages_tx.subscribe()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    async fn disconnect(&self) -> Result<(), PubSubError> {
        self.status_tx.send_replace(ConnectionStatus::Closed);
        Ok(())
    }
}
