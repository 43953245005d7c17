//! Monitor command - stream controller output

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use ewater_link::pubsub::DeviceEvent;
use ewater_link::LinkEvent;
use tokio::sync::broadcast;

use super::{connect_online, interrupt_flag, interrupted, open_serial};
use crate::config::MergedConfig;
use crate::output::OutputContext;

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Print serial console lines until Ctrl+C or the port closes
pub async fn monitor_serial(merged: &MergedConfig, port: &str, ctx: &OutputContext) -> Result<()> {
    let running = interrupt_flag()?;
    let (manager, session) = open_serial(merged, port, None).await?;
    let mut link = session.transport().subscribe();
    ctx.info(&format!("Monitoring {}. Press Ctrl+C to stop", port));

    loop {
        tokio::select! {
            event = link.recv() => match event {
                Ok(LinkEvent::Line(line)) => println!("{} {}", timestamp().dimmed(), line),
                Ok(LinkEvent::Error(e)) => ctx.error(&format!("Serial error: {}", e)),
                Ok(LinkEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    ctx.info("Serial link closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    ctx.warn(&format!("Skipped {} lines", n));
                }
            },
            _ = interrupted(&running) => break,
        }
    }

    manager.disconnect().await?;
    Ok(())
}

/// Print a device's status and log messages until Ctrl+C
pub async fn monitor_online(
    merged: &MergedConfig,
    device: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let running = interrupt_flag()?;
    let online = connect_online(merged, ctx).await?;
    online.discover().await?;
    online.select_device(device).await?;
    let mut events = online.events();
    ctx.info(&format!("Monitoring {}. Press Ctrl+C to stop", device));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.device_id() == device => print_event(&event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    ctx.warn(&format!("Skipped {} events", n));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    ctx.info("Broker connection closed");
                    break;
                }
            },
            _ = interrupted(&running) => break,
        }
    }

    online.disconnect().await?;
    Ok(())
}

fn print_event(event: &DeviceEvent) {
    let ts = timestamp().dimmed();
    match event {
        DeviceEvent::Heartbeat { heartbeat, .. } => {
            let status = heartbeat.status.as_deref().unwrap_or("alive");
            println!("{} {} {}", ts, "HEARTBEAT".blue(), status);
        }
        DeviceEvent::Status {
            report: Some(report),
            ..
        } => println!("{} {} {}", ts, "STATUS".cyan(), report.summary()),
        DeviceEvent::Status { raw, .. } => println!("{} {} {}", ts, "STATUS".cyan(), raw),
        DeviceEvent::Log { event, .. } if event.is_error() => {
            println!("{} {}", ts, event.display().red())
        }
        DeviceEvent::Log { event, .. } => println!("{} {}", ts, event.display()),
    }
}
