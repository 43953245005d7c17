//! Devices command - heartbeat discovery

use std::time::Duration;

use anyhow::Result;
use ewater_link::pubsub::DeviceRecord;

use super::connect_online;
use crate::config::MergedConfig;
use crate::output::{DeviceRow, OutputContext};

pub async fn devices(merged: &MergedConfig, wait_secs: u64, ctx: &OutputContext) -> Result<()> {
    let online = connect_online(merged, ctx).await?;
    online.discover().await?;

    ctx.info(&format!("Listening for heartbeats for {}s...", wait_secs));
    tokio::time::sleep(Duration::from_secs(wait_secs)).await;

    let rows: Vec<DeviceRow> = online
        .registry()
        .list()
        .into_iter()
        .map(|(device_id, record)| device_row(device_id, &record))
        .collect();
    online.disconnect().await?;

    ctx.print(&rows);
    Ok(())
}

fn device_row(device_id: String, record: &DeviceRecord) -> DeviceRow {
    let hb = &record.heartbeat;
    let dash = || "-".to_string();
    DeviceRow {
        device_id,
        firmware: hb.firmware_version.clone().unwrap_or_else(dash),
        ip: hb.ip.clone().unwrap_or_else(dash),
        wifi: match (&hb.ssid, hb.rssi) {
            (Some(ssid), Some(rssi)) => format!("{} ({} dBm)", ssid, rssi),
            (Some(ssid), None) => ssid.clone(),
            (None, Some(rssi)) => format!("{} dBm", rssi),
            (None, None) => dash(),
        },
        uptime: hb.uptime.map(|u| u.to_string()).unwrap_or_else(dash),
        last_seen: record
            .last_seen
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(dash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewater_link::pubsub::Heartbeat;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_row_from_partial_heartbeat() {
        let record = DeviceRecord {
            heartbeat: Heartbeat {
                ssid: Some("Shop".to_string()),
                rssi: Some(-61),
                firmware_version: Some("1.4.2".to_string()),
                ..Heartbeat::default()
            },
            last_seen: None,
            status: None,
            last_log: None,
        };

        let row = device_row("ew-001".to_string(), &record);
        assert_eq!(row.device_id, "ew-001");
        assert_eq!(row.firmware, "1.4.2");
        assert_eq!(row.wifi, "Shop (-61 dBm)");
        assert_eq!(row.ip, "-");
        assert_eq!(row.last_seen, "-");
    }
}
