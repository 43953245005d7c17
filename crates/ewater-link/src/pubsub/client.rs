//! Pub/sub client trait and connection status

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PubSubError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),

    #[error("Pub/sub not supported: {0}")]
    Unsupported(String),
}

/// A message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub topic: String,
    pub payload: String,
}

/// Broker connection status, observable for the life of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Connection lost or refused; the client keeps retrying
    Reconnecting(String),
    Closed,
}

/// How a bounded wait for the first connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The client closed before connecting
    Failed(String),
    /// Neither connected nor failed in time. The client stays alive and
    /// may still connect; watch [`PubSubClient::status`] for that.
    Pending,
}

/// Broker client interface used by the online session
#[async_trait]
pub trait PubSubClient: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), PubSubError>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PubSubError>;

    /// Subscribe to incoming messages on every subscribed topic.
    fn messages(&self) -> broadcast::Receiver<PubSubMessage>;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;

    async fn disconnect(&self) -> Result<(), PubSubError>;
}

/// Wait up to `timeout` for the client to report a connection.
///
/// Errors that the client will retry do not end the wait; only a closed
/// client does.
pub async fn wait_for_connection(client: &dyn PubSubClient, timeout: Duration) -> ConnectOutcome {
    let mut status = client.status();

    let wait = async {
        loop {
            let current = status.borrow_and_update().clone();
            match current {
                ConnectionStatus::Connected => return ConnectOutcome::Connected,
                ConnectionStatus::Closed => {
                    return ConnectOutcome::Failed("client closed".to_string())
                }
                ConnectionStatus::Connecting | ConnectionStatus::Reconnecting(_) => {}
            }
            if status.changed().await.is_err() {
                return ConnectOutcome::Failed("client dropped".to_string());
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(?timeout, "Broker connection pending after timeout");
            ConnectOutcome::Pending
        }
    }
}
