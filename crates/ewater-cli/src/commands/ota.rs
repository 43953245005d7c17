//! OTA command - serve firmware over HTTP and optionally trigger a device

use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use ewater_firmware::OtaServer;
use ewater_link::pubsub::DeviceEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use super::{connect_online, interrupt_flag, interrupted};
use crate::config::MergedConfig;
use crate::output::OutputContext;

pub async fn ota(
    merged: &MergedConfig,
    file: &Path,
    device: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let running = interrupt_flag()?;
    let server = OtaServer::new(merged.ota.clone());
    let session = server.start(file).await?;

    ctx.print_kv(&[
        ("File", session.file.display().to_string()),
        ("URL", session.url.to_string()),
    ]);
    if !session.reachable {
        ctx.warn("No LAN address found; the URL points at loopback and devices cannot reach it");
    }

    let result = match device {
        Some(device) => {
            trigger_and_follow(merged, device, session.url.as_str(), &running, ctx).await
        }
        None => {
            ctx.info("Serving. Press Ctrl+C to stop");
            interrupted(&running).await;
            Ok(())
        }
    };

    server.stop().await;
    ctx.info("OTA server stopped");
    result
}

/// Publish the OTA command, then show the device's progress until it
/// reports 100%, logs an error or Ctrl+C.
async fn trigger_and_follow(
    merged: &MergedConfig,
    device: &str,
    url: &str,
    running: &AtomicBool,
    ctx: &OutputContext,
) -> Result<()> {
    let online = connect_online(merged, ctx).await?;
    online.select_device(device).await?;
    let mut events = online.events();

    let outcome = online.trigger_ota(url, merged.api_secret.as_deref()).await?;
    for warning in &outcome.warnings {
        ctx.warn(warning);
    }
    ctx.info(&format!("OTA command sent to {}. Press Ctrl+C to stop", device));

    let pb = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_message("Waiting for device...");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DeviceEvent::Log { event, .. }) if event.is_ota() || event.is_error() => {
                    if let Some(percent) = event.ota_progress() {
                        pb.set_position(u64::from(percent));
                        if percent >= 100 {
                            pb.finish_with_message("Download complete; device is rebooting");
                            break;
                        }
                    }
                    pb.set_message(event.display());
                    if event.is_error() {
                        pb.abandon_with_message(event.display());
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    pb.abandon_with_message("Broker connection closed");
                    break;
                }
            },
            _ = interrupted(running) => {
                pb.abandon();
                break;
            }
        }
    }

    online.disconnect().await?;
    Ok(())
}
