//! Devices discovered through heartbeats

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::telemetry::{DeviceEvent, Heartbeat, LogEvent, StatusReport};

/// Everything known about one device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecord {
    pub heartbeat: Heartbeat,
    /// Time of the last heartbeat
    pub last_seen: Option<DateTime<Utc>>,
    pub status: Option<StatusReport>,
    pub last_log: Option<LogEvent>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into the device's record.
    ///
    /// Only heartbeats create records; status and log events for a device
    /// that never sent one are ignored.
    pub fn record(&self, event: &DeviceEvent, at: DateTime<Utc>) {
        let mut devices = self.devices.write();
        match event {
            DeviceEvent::Heartbeat {
                device_id,
                heartbeat,
            } => {
                let entry = devices.entry(device_id.clone()).or_default();
                entry.heartbeat = heartbeat.clone();
                entry.last_seen = Some(at);
            }
            DeviceEvent::Status {
                device_id, report, ..
            } => {
                if let (Some(entry), Some(report)) = (devices.get_mut(device_id), report) {
                    entry.status = Some(report.clone());
                }
            }
            DeviceEvent::Log { device_id, event } => {
                if let Some(entry) = devices.get_mut(device_id) {
                    entry.last_log = Some(event.clone());
                }
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.read().get(device_id).cloned()
    }

    /// All devices ordered by id.
    pub fn list(&self) -> Vec<(String, DeviceRecord)> {
        self.devices
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }
}
