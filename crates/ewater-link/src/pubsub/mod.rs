//! Broker (pub/sub) link to controllers
//!
//! - [`PubSubClient`] trait with an MQTT adapter (feature `mqtt`) and a mock
//! - Topic model and telemetry decoding
//! - [`OnlineSession`]: discovery, monitoring and signed publication

mod client;
pub mod mock;
pub mod online;
pub mod registry;
pub mod telemetry;
pub mod topics;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use client::{
    wait_for_connection, ConnectOutcome, ConnectionStatus, PubSubClient, PubSubError,
    PubSubMessage,
};
pub use online::{OnlineError, OnlineSession, PublishOutcome};
pub use registry::{DeviceRecord, DeviceRegistry};
pub use telemetry::{DeviceEvent, Heartbeat, LogEvent, StatusReport};

use std::sync::Arc;

use crate::config::MqttConfig;

/// Connect to the configured broker.
pub fn connect(config: &MqttConfig) -> Result<Arc<dyn PubSubClient>, PubSubError> {
    #[cfg(feature = "mqtt")]
    {
        Ok(Arc::new(mqtt::MqttPubSubClient::connect(config)?))
    }
    #[cfg(not(feature = "mqtt"))]
    {
        let _ = config;
        Err(PubSubError::Unsupported(
            "MQTT requires the 'mqtt' feature".to_string(),
        ))
    }
}
