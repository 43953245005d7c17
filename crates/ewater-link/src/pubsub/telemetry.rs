//! Telemetry published by controllers
//!
//! Heartbeats, status reports and log events arrive as JSON objects. Every
//! field is optional: older firmware omits some, and a malformed field must
//! not hide the rest of the message.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::topics::{self, TopicKind};
use super::PubSubMessage;

static OTA_PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Progress:\s*(\d+)%").expect("valid progress regex"));

static ERROR_EVENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error|alert").expect("valid event regex"));

/// Periodic `vending/<id>/heartbeat` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub status: Option<String>,
    /// Seconds since boot
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub ip: Option<String>,
    /// dBm
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub free_heap: Option<u64>,
}

/// Retained `vending/<id>/status/out` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub device_id: Option<String>,
    /// `IDLE`, `ACTIVE`, `DISPENSING`, `PAUSED`, `FREE_WATER` or `UNKNOWN`
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
    /// Liters
    #[serde(default)]
    pub last_dispense: Option<f64>,
    #[serde(default)]
    pub tds: Option<f64>,
    #[serde(default)]
    pub free_water_available: Option<bool>,
}

impl StatusReport {
    /// One-line summary for monitors.
    pub fn summary(&self) -> String {
        fn or_unknown<T: ToString>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".to_string())
        }
        format!(
            "{} | balance={} | last={}L | tds={}",
            self.state.as_deref().unwrap_or("UNKNOWN"),
            or_unknown(&self.balance),
            or_unknown(&self.last_dispense),
            or_unknown(&self.tds),
        )
    }
}

/// `vending/<id>/log/out` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub message: String,
}

impl LogEvent {
    /// Parse a log payload. Anything that is not a JSON object becomes a
    /// message with no event name.
    pub fn parse(payload: &str) -> Self {
        match serde_json::from_str::<LogEvent>(payload) {
            Ok(event) => event,
            Err(_) => LogEvent {
                device_id: None,
                event: String::new(),
                message: payload.to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        ERROR_EVENT.is_match(&self.event)
    }

    /// OTA-related events: an `ota*` event name or a progress line.
    pub fn is_ota(&self) -> bool {
        self.event.to_ascii_lowercase().starts_with("ota") || self.message.contains("Progress")
    }

    pub fn ota_progress(&self) -> Option<u8> {
        ota_progress(&self.message)
    }

    pub fn display(&self) -> String {
        let event = if self.event.is_empty() { "LOG" } else { &self.event };
        format!("[{}] {}", event, self.message)
    }
}

/// Extract the OTA percentage from a `Progress: NN%` log line.
pub fn ota_progress(text: &str) -> Option<u8> {
    let captures = OTA_PROGRESS.captures(text)?;
    let value: u32 = captures[1].parse().ok()?;
    Some(value.min(100) as u8)
}

/// A decoded controller message
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Heartbeat {
        device_id: String,
        heartbeat: Heartbeat,
    },
    Status {
        device_id: String,
        /// `None` when the payload was not a status object
        report: Option<StatusReport>,
        raw: String,
    },
    Log {
        device_id: String,
        event: LogEvent,
    },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Heartbeat { device_id, .. }
            | DeviceEvent::Status { device_id, .. }
            | DeviceEvent::Log { device_id, .. } => device_id,
        }
    }
}

/// Decode a message on one of the controller's outbound topics.
///
/// Returns `None` for inbound topics, foreign topics and heartbeats that
/// are not JSON objects.
pub fn decode(message: &PubSubMessage) -> Option<DeviceEvent> {
    let (device_id, kind) = topics::parse(&message.topic)?;
    let device_id = device_id.to_string();

    match kind {
        TopicKind::Heartbeat => match serde_json::from_str::<Heartbeat>(&message.payload) {
            Ok(heartbeat) => Some(DeviceEvent::Heartbeat {
                device_id,
                heartbeat,
            }),
            Err(e) => {
                tracing::warn!(device_id = %device_id, error = %e, "Unparseable heartbeat");
                None
            }
        },
        TopicKind::StatusOut => Some(DeviceEvent::Status {
            device_id,
            report: serde_json::from_str(&message.payload).ok(),
            raw: message.payload.clone(),
        }),
        TopicKind::LogOut => Some(DeviceEvent::Log {
            device_id,
            event: LogEvent::parse(&message.payload),
        }),
        TopicKind::ConfigIn | TopicKind::OtaIn => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(topic: &str, payload: &str) -> PubSubMessage {
        PubSubMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_decode_heartbeat() {
        let event = decode(&message(
            "vending/vm-001/heartbeat",
            r#"{"status":"online","uptime":3600,"ip":"10.0.0.7","rssi":-61,"ssid":"Home","firmware_version":"1.4.2","free_heap":151000}"#,
        ))
        .unwrap();

        assert_eq!(
            event,
            DeviceEvent::Heartbeat {
                device_id: "vm-001".to_string(),
                heartbeat: Heartbeat {
                    status: Some("online".to_string()),
                    uptime: Some(3600),
                    ip: Some("10.0.0.7".to_string()),
                    rssi: Some(-61),
                    ssid: Some("Home".to_string()),
                    firmware_version: Some("1.4.2".to_string()),
                    free_heap: Some(151000),
                },
            }
        );
    }

    #[test]
    fn test_partial_heartbeat_uses_defaults() {
        let event = decode(&message("vending/a/heartbeat", r#"{"ip":"1.2.3.4"}"#)).unwrap();
        let DeviceEvent::Heartbeat { heartbeat, .. } = event else {
            panic!("expected heartbeat");
        };
        assert_eq!(heartbeat.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(heartbeat.rssi, None);
    }

    #[test]
    fn test_garbage_heartbeat_is_dropped() {
        assert_eq!(decode(&message("vending/a/heartbeat", "not json")), None);
    }

    #[test]
    fn test_status_summary() {
        let event = decode(&message(
            "vending/vm-001/status/out",
            r#"{"device_id":"vm-001","state":"IDLE","balance":2500,"last_dispense":1.5,"tds":42,"free_water_available":true}"#,
        ))
        .unwrap();
        let DeviceEvent::Status { report, .. } = event else {
            panic!("expected status");
        };
        let report = report.unwrap();
        assert_eq!(report.free_water_available, Some(true));
        assert_eq!(report.summary(), "IDLE | balance=2500 | last=1.5L | tds=42");
    }

    #[test]
    fn test_status_non_json_kept_raw() {
        let event = decode(&message("vending/vm-001/status/out", "booting")).unwrap();
        assert_eq!(
            event,
            DeviceEvent::Status {
                device_id: "vm-001".to_string(),
                report: None,
                raw: "booting".to_string(),
            }
        );
    }

    #[test]
    fn test_log_event_ota_progress() {
        let event = LogEvent::parse(r#"{"event":"ota","message":"Progress: 45%"}"#);
        assert!(event.is_ota());
        assert!(!event.is_error());
        assert_eq!(event.ota_progress(), Some(45));
        assert_eq!(event.display(), "[ota] Progress: 45%");
    }

    #[test]
    fn test_log_event_plain_text() {
        let event = LogEvent::parse("OTA Progress: 100%");
        assert_eq!(event.event, "");
        assert_eq!(event.display(), "[LOG] OTA Progress: 100%");
        assert!(event.is_ota());
        assert_eq!(event.ota_progress(), Some(100));
    }

    #[test]
    fn test_error_events() {
        let event = LogEvent::parse(r#"{"event":"TDS_ALERT","message":"high"}"#);
        assert!(event.is_error());
    }

    #[test]
    fn test_ota_progress_caps_at_100() {
        assert_eq!(ota_progress("Progress: 250%"), Some(100));
        assert_eq!(ota_progress("Progress:7%"), Some(7));
        assert_eq!(ota_progress("no progress here"), None);
    }

    #[test]
    fn test_inbound_topics_ignored() {
        assert_eq!(decode(&message("vending/vm-001/config/in", "{}")), None);
    }
}
