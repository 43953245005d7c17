//! Link configuration
//!
//! Serial and MQTT settings. Every field has a default so a partial TOML
//! section is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serial link and dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate of the controller's console
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
    /// Pause between consecutive operations in a dispatch
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,
    /// Delay before the automatic `GET_CONFIG` after opening a port
    #[serde(default = "default_initial_read_delay_ms")]
    pub initial_read_delay_ms: u64,
    /// How long to collect report lines after `GET_CONFIG`
    #[serde(default = "default_report_settle_ms")]
    pub report_settle_ms: u64,
}

fn default_serial_baud() -> u32 {
    115_200
}

fn default_dispatch_delay_ms() -> u64 {
    200
}

fn default_initial_read_delay_ms() -> u64 {
    500
}

fn default_report_settle_ms() -> u64 {
    1500
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: default_serial_baud(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            initial_read_delay_ms: default_initial_read_delay_ms(),
            report_settle_ms: default_report_settle_ms(),
        }
    }
}

impl SerialConfig {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    pub fn initial_read_delay(&self) -> Duration {
        Duration::from_millis(self.initial_read_delay_ms)
    }

    pub fn report_settle(&self) -> Duration {
        Duration::from_millis(self.report_settle_ms)
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Give up waiting for the broker after this long and report pending
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_connect_timeout_ms() -> u64 {
    11_000
}

fn default_reconnect_period_ms() -> u64 {
    5000
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_period_ms: default_reconnect_period_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: MqttConfig = from_json(r#"{"host": "broker.lan"}"#);
        assert_eq!(config.host, "broker.lan");
        assert_eq!(config.port, 1883);
        assert_eq!(config.connect_timeout(), Duration::from_secs(11));

        let serial: SerialConfig = from_json("{}");
        assert_eq!(serial.baud, 115_200);
        assert_eq!(serial.dispatch_delay(), Duration::from_millis(200));
    }

    fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> T {
        serde_json::from_str(json).unwrap()
    }
}
