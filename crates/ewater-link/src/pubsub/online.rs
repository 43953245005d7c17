//! Online (broker) session
//!
//! Wraps a [`PubSubClient`] with the controller topic model: heartbeat
//! discovery, per-device monitoring and signed config/OTA publication.
//! There is no config read-back over the broker, so pushes reconcile
//! against an empty snapshot and every drafted field is sent.

use std::sync::Arc;
use std::time::Duration;

use ewater_core::signing::{generate_nonce, now_ms};
use ewater_core::{
    reconcile, ApplyMode, Channel, ConfigDraft, DeviceConfigSnapshot, FieldValue, Fields,
    MessageKind, SignableMessage, SigningError, ValidationError,
};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::DeviceRegistry;
use super::telemetry::{self, DeviceEvent};
use super::topics::{self, HEARTBEAT_WILDCARD};
use super::{wait_for_connection, ConnectOutcome, PubSubClient, PubSubError, PubSubMessage};

#[derive(Debug, Error)]
pub enum OnlineError {
    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Firmware URL is required")]
    MissingFirmwareUrl,

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// What a publish sent
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub topic: String,
    /// The JSON body as published
    pub payload: String,
    pub signed: bool,
    pub warnings: Vec<String>,
}

pub struct OnlineSession {
    client: Arc<dyn PubSubClient>,
    registry: Arc<DeviceRegistry>,
    selected: Arc<RwLock<Option<String>>>,
    events_tx: broadcast::Sender<DeviceEvent>,
    pump: JoinHandle<()>,
}

impl OnlineSession {
    pub fn new(client: Arc<dyn PubSubClient>) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let selected = Arc::new(RwLock::new(None));
        let (events_tx, _) = broadcast::channel(256);

        let pump = tokio::spawn(pump_messages(
            client.messages(),
            registry.clone(),
            selected.clone(),
            events_tx.clone(),
        ));

        Self {
            client,
            registry,
            selected,
            events_tx,
            pump,
        }
    }

    /// Wait for the client's first connection.
    pub async fn wait_connected(&self, timeout: Duration) -> ConnectOutcome {
        wait_for_connection(self.client.as_ref(), timeout).await
    }

    pub fn client(&self) -> &Arc<dyn PubSubClient> {
        &self.client
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Heartbeats from every device, plus status and log events from the
    /// selected device.
    pub fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events_tx.subscribe()
    }

    /// Start listening for heartbeats from every device.
    pub async fn discover(&self) -> Result<(), OnlineError> {
        self.client.subscribe(HEARTBEAT_WILDCARD).await?;
        info!("Listening for device heartbeats");
        Ok(())
    }

    /// Select a device and subscribe to its log and status topics.
    pub async fn select_device(&self, device_id: &str) -> Result<(), OnlineError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(OnlineError::NoDeviceSelected);
        }
        self.client.subscribe(&topics::log_out(device_id)).await?;
        self.client.subscribe(&topics::status_out(device_id)).await?;
        *self.selected.write() = Some(device_id.to_string());
        info!(device_id, "Device selected");
        Ok(())
    }

    pub fn selected_device(&self) -> Option<String> {
        self.selected.read().clone()
    }

    fn require_selected(&self) -> Result<String, OnlineError> {
        self.selected_device().ok_or(OnlineError::NoDeviceSelected)
    }

    /// Publish `draft` to the selected device's `config/in` topic.
    ///
    /// Signed with `signing_secret` when one is given, otherwise published
    /// unsigned with a warning.
    pub async fn push_config(
        &self,
        draft: &ConfigDraft,
        apply: ApplyMode,
        signing_secret: Option<&str>,
    ) -> Result<PublishOutcome, OnlineError> {
        let device_id = self.require_selected()?;
        let changes = reconcile(&DeviceConfigSnapshot::new(), draft, Channel::PubSub)?;

        let ts = now_ms();
        let nonce = generate_nonce(MessageKind::Config, ts);
        let plan = changes.to_pubsub(apply, &nonce, ts);
        debug!(device_id = %device_id, fields = plan.field_count, "Config payload built");

        let mut outcome = self
            .publish_signed(
                MessageKind::Config,
                &device_id,
                &plan.fields,
                topics::config_in(&device_id),
                signing_secret,
            )
            .await?;
        let mut warnings = plan.warnings;
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;
        Ok(outcome)
    }

    /// Tell the selected device to download firmware from `firmware_url`.
    pub async fn trigger_ota(
        &self,
        firmware_url: &str,
        signing_secret: Option<&str>,
    ) -> Result<PublishOutcome, OnlineError> {
        let device_id = self.require_selected()?;
        if firmware_url.trim().is_empty() {
            return Err(OnlineError::MissingFirmwareUrl);
        }

        let ts = now_ms();
        let mut fields = Fields::new();
        fields.insert("firmware_url".to_string(), FieldValue::from(firmware_url));
        fields.insert(
            "nonce".to_string(),
            FieldValue::from(generate_nonce(MessageKind::Ota, ts)),
        );
        fields.insert("ts".to_string(), FieldValue::from(ts));

        self.publish_signed(
            MessageKind::Ota,
            &device_id,
            &fields,
            topics::ota_in(&device_id),
            signing_secret,
        )
        .await
    }

    async fn publish_signed(
        &self,
        kind: MessageKind,
        device_id: &str,
        fields: &Fields,
        topic: String,
        signing_secret: Option<&str>,
    ) -> Result<PublishOutcome, OnlineError> {
        let message = SignableMessage::new(kind, device_id, fields)?;
        let mut warnings = Vec::new();

        let signature = match signing_secret.filter(|s| !s.is_empty()) {
            Some(secret) => Some(message.sign(secret)?.signature),
            None => {
                let warning = format!("API secret is empty; {} message will be unsigned", kind);
                warn!(device_id, "{}", warning);
                warnings.push(warning);
                None
            }
        };

        let payload = message.wire_payload(signature.as_deref());
        self.client.publish(&topic, &payload).await?;
        info!(topic = %topic, signed = signature.is_some(), "Published {} message", kind);

        Ok(PublishOutcome {
            topic,
            payload,
            signed: signature.is_some(),
            warnings,
        })
    }

    pub async fn disconnect(&self) -> Result<(), OnlineError> {
        self.client.disconnect().await?;
        *self.selected.write() = None;
        self.registry.clear();
        Ok(())
    }
}

impl Drop for OnlineSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_messages(
    mut messages: broadcast::Receiver<PubSubMessage>,
    registry: Arc<DeviceRegistry>,
    selected: Arc<RwLock<Option<String>>>,
    events_tx: broadcast::Sender<DeviceEvent>,
) {
    loop {
        let message = match messages.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Dropped broker messages");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(event) = telemetry::decode(&message) else {
            continue;
        };
        registry.record(&event, chrono::Utc::now());

        let forward = match &event {
            DeviceEvent::Heartbeat { .. } => true,
            other => selected.read().as_deref() == Some(other.device_id()),
        };
        if forward {
            let _ = events_tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::mock::MockPubSubClient;
    use crate::pubsub::ConnectionStatus;
    use ewater_core::signing::hmac_hex;
    use ewater_core::ConfigField;

    fn session() -> (Arc<MockPubSubClient>, OnlineSession) {
        let client = Arc::new(MockPubSubClient::connected());
        let session = OnlineSession::new(client.clone());
        (client, session)
    }

    fn payload_json(outcome: &PublishOutcome) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&outcome.payload).unwrap()
    }

    #[tokio::test]
    async fn test_discover_and_select_subscriptions() {
        let (client, session) = session();
        session.discover().await.unwrap();
        session.select_device("vm-001").await.unwrap();

        assert_eq!(
            client.subscriptions(),
            vec![
                "vending/+/heartbeat",
                "vending/vm-001/log/out",
                "vending/vm-001/status/out"
            ]
        );
        assert_eq!(session.selected_device().as_deref(), Some("vm-001"));
    }

    #[tokio::test]
    async fn test_heartbeat_populates_registry() {
        let (client, session) = session();
        let mut events = session.events();
        client.inject("vending/vm-007/heartbeat", r#"{"ip":"10.0.0.9","rssi":-70}"#);

        let event = events.recv().await.unwrap();
        assert_eq!(event.device_id(), "vm-007");
        let record = session.registry().get("vm-007").unwrap();
        assert_eq!(record.heartbeat.ip.as_deref(), Some("10.0.0.9"));
        assert!(record.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_only_selected_device_logs_forwarded() {
        let (client, session) = session();
        session.select_device("vm-001").await.unwrap();
        let mut events = session.events();

        client.inject("vending/vm-002/log/out", r#"{"event":"boot","message":"other"}"#);
        client.inject("vending/vm-001/log/out", r#"{"event":"ota","message":"Progress: 30%"}"#);

        let event = events.recv().await.unwrap();
        let DeviceEvent::Log { device_id, event } = event else {
            panic!("expected log event");
        };
        assert_eq!(device_id, "vm-001");
        assert_eq!(event.ota_progress(), Some(30));
    }

    #[tokio::test]
    async fn test_push_config_signed() {
        let (client, session) = session();
        session.select_device("vm-001").await.unwrap();
        let draft = ConfigDraft::new()
            .with(ConfigField::PricePerLiter, 1200i64)
            .with(ConfigField::FreeWaterAmount, 500i64);

        let outcome = session
            .push_config(&draft, ApplyMode::Now, Some("s3cret"))
            .await
            .unwrap();

        assert_eq!(outcome.topic, "vending/vm-001/config/in");
        assert!(outcome.signed);
        let body = payload_json(&outcome);
        assert_eq!(body["apply"], "now");
        assert_eq!(body["pricePerLiter"], 1200);
        assert_eq!(body["freeWaterAmount"], 0.5);
        assert!(body["nonce"].as_str().unwrap().starts_with("cfg_"));

        let mut fields = Fields::new();
        for (key, value) in &body {
            if key != "sig" {
                fields.insert(key.clone(), FieldValue::from_json(value).unwrap());
            }
        }
        let canonical = SignableMessage::new(MessageKind::Config, "vm-001", &fields)
            .unwrap()
            .canonical();
        assert_eq!(body["sig"], hmac_hex("s3cret", &canonical));

        let published = client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, outcome.payload);
    }

    #[tokio::test]
    async fn test_push_config_unsigned_warns() {
        let (_client, session) = session();
        session.select_device("vm-001").await.unwrap();
        let draft = ConfigDraft::new().with(ConfigField::SessionTimeout, 300i64);

        let outcome = session
            .push_config(&draft, ApplyMode::Restart, None)
            .await
            .unwrap();

        assert!(!outcome.signed);
        assert!(payload_json(&outcome).get("sig").is_none());
        assert!(outcome.warnings.iter().any(|w| w.contains("unsigned")));
    }

    #[tokio::test]
    async fn test_push_config_drops_serial_only_fields() {
        let (_client, session) = session();
        session.select_device("vm-001").await.unwrap();
        let draft = ConfigDraft::new()
            .with(ConfigField::GroupId, "north")
            .with(ConfigField::PricePerLiter, 900i64);

        let outcome = session
            .push_config(&draft, ApplyMode::Now, Some("k"))
            .await
            .unwrap();

        let body = payload_json(&outcome);
        assert!(body.get("groupId").is_none());
        assert_eq!(body["pricePerLiter"], 900);
        assert!(outcome.warnings.iter().any(|w| w.contains("groupId")));
    }

    #[tokio::test]
    async fn test_push_requires_selection() {
        let (client, session) = session();
        let err = session
            .push_config(&ConfigDraft::new(), ApplyMode::Now, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OnlineError::NoDeviceSelected));
        assert!(client.published().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_ota_payload() {
        let (client, session) = session();
        session.select_device("vm-001").await.unwrap();

        let outcome = session
            .trigger_ota("http://10.0.0.2:40123/fw.bin", Some("k"))
            .await
            .unwrap();

        assert_eq!(outcome.topic, "vending/vm-001/ota/in");
        let body = payload_json(&outcome);
        assert_eq!(body["firmware_url"], "http://10.0.0.2:40123/fw.bin");
        assert!(body["nonce"].as_str().unwrap().starts_with("ota_"));
        assert!(body["ts"].is_number());
        assert_eq!(body["sig"].as_str().unwrap().len(), 64);
        assert_eq!(client.published()[0].topic, "vending/vm-001/ota/in");
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_fails() {
        let client = Arc::new(MockPubSubClient::with_status(ConnectionStatus::Connecting));
        let session = OnlineSession::new(client.clone());
        let err = session.select_device("vm-001").await.unwrap_err();
        assert!(matches!(err, OnlineError::PubSub(PubSubError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_pending() {
        let client = Arc::new(MockPubSubClient::with_status(ConnectionStatus::Connecting));
        let session = OnlineSession::new(client.clone());

        let outcome = session.wait_connected(Duration::from_secs(11)).await;
        assert_eq!(outcome, ConnectOutcome::Pending);

        // the client survives the timeout and later events are observable
        let mut status = session.client().status();
        client.set_status(ConnectionStatus::Connected);
        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_reconnecting_does_not_end_wait() {
        let client = Arc::new(MockPubSubClient::with_status(ConnectionStatus::Connecting));
        let session = OnlineSession::new(client.clone());

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move {
                wait_for_connection(client.as_ref(), Duration::from_secs(5)).await
            })
        };
        tokio::task::yield_now().await;
        client.set_status(ConnectionStatus::Reconnecting("refused".to_string()));
        client.set_status(ConnectionStatus::Connected);

        assert_eq!(waiter.await.unwrap(), ConnectOutcome::Connected);
        drop(session);
    }
}
