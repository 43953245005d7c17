//! MQTT client backed by rumqttc
//!
//! The rumqttc event loop runs on its own task. It publishes connection
//! status on a watch channel, fans incoming publishes out on a broadcast
//! channel and re-subscribes every known topic after each (re)connect,
//! since sessions are clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::{ConnectionStatus, PubSubClient, PubSubError, PubSubMessage};
use crate::config::MqttConfig;

const REQUEST_CAPACITY: usize = 64;

pub struct MqttPubSubClient {
    client: AsyncClient,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    messages_tx: broadcast::Sender<PubSubMessage>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closing: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPubSubClient {
    /// Start connecting to the broker in the background.
    ///
    /// Returns immediately; use
    /// [`wait_for_connection`](super::wait_for_connection) to bound the
    /// wait for the first connection.
    pub fn connect(config: &MqttConfig) -> Result<Self, PubSubError> {
        if config.host.trim().is_empty() || config.port == 0 {
            return Err(PubSubError::InvalidConfig(
                "Missing MQTT host or port".to_string(),
            ));
        }

        let client_id = format!("eWater_Desktop_{:08x}", rand::random::<u32>());
        let mut options = MqttOptions::new(client_id.clone(), config.host.trim(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        let status_tx = Arc::new(status_tx);
        let (messages_tx, _) = broadcast::channel(512);
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let closing = Arc::new(AtomicBool::new(false));

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            "Connecting to MQTT broker"
        );

        let handle = tokio::spawn(drive_event_loop(
            event_loop,
            client.clone(),
            status_tx.clone(),
            messages_tx.clone(),
            subscriptions.clone(),
            closing.clone(),
            config.reconnect_period(),
        ));

        Ok(Self {
            client,
            status_tx,
            messages_tx,
            subscriptions,
            closing,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    messages_tx: broadcast::Sender<PubSubMessage>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closing: Arc<AtomicBool>,
    reconnect_period: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("MQTT connected");
                status_tx.send_replace(ConnectionStatus::Connected);
                let topics = subscriptions.lock().clone();
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        tracing::warn!(%topic, error = %e, "Re-subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                let _ = messages_tx.send(PubSubMessage {
                    topic: publish.topic.clone(),
                    payload,
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                status_tx.send_replace(ConnectionStatus::Closed);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    status_tx.send_replace(ConnectionStatus::Closed);
                    break;
                }
                tracing::warn!(error = %e, "MQTT connection error; retrying");
                status_tx.send_replace(ConnectionStatus::Reconnecting(e.to_string()));
                tokio::time::sleep(reconnect_period).await;
            }
        }
    }
    tracing::info!("MQTT event loop stopped");
}

#[async_trait]
impl PubSubClient for MqttPubSubClient {
    async fn subscribe(&self, topic: &str) -> Result<(), PubSubError> {
        {
            let mut subscriptions = self.subscriptions.lock();
            if !subscriptions.iter().any(|t| t == topic) {
                subscriptions.push(topic.to_string());
            }
        }

        if !self.is_connected() {
            tracing::debug!(topic, "Not connected yet; subscription deferred to connect");
            return Ok(());
        }

        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| PubSubError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(topic, "Subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PubSubError> {
        if !self.is_connected() {
            return Err(PubSubError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| PubSubError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.messages_tx.subscribe()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    async fn disconnect(&self) -> Result<(), PubSubError> {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "Disconnect request not delivered");
        }
        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            // the loop exits on the outgoing disconnect; bound the wait
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                tracing::debug!("MQTT event loop did not stop in time");
            }
        }
        self.status_tx.send_replace(ConnectionStatus::Closed);
        Ok(())
    }
}

impl Drop for MqttPubSubClient {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
    }
}
