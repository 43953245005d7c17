//! Command implementations for ewater

pub mod config;
pub mod devices;
pub mod flash;
pub mod monitor;
pub mod ota;
pub mod ports;
pub mod sign;

pub use config::{build_draft, push_online, push_serial, read_config};
pub use devices::devices;
pub use flash::flash;
pub use monitor::{monitor_online, monitor_serial};
pub use ota::ota;
pub use ports::ports;
pub use sign::sign;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ewater_link::pubsub::{self, ConnectOutcome};
use ewater_link::transport::default_connector;
use ewater_link::{OnlineSession, SerialManager, SerialSession};
use tracing::debug;

use crate::config::MergedConfig;
use crate::output::OutputContext;

/// Open `port` and start a session that has requested the configuration
/// report.
pub(crate) async fn open_serial(
    merged: &MergedConfig,
    port: &str,
    baud: Option<u32>,
) -> Result<(SerialManager, SerialSession)> {
    let manager = SerialManager::new(default_connector()?);
    let baud = baud.unwrap_or(merged.serial.baud);
    debug!(port, baud, "Opening serial port");
    let transport = manager
        .connect(port, baud)
        .await
        .with_context(|| format!("Failed to open {}", port))?;
    let session = SerialSession::open(transport, merged.serial.clone()).await?;
    Ok((manager, session))
}

/// Connect to the broker and wait for the first connection.
pub(crate) async fn connect_online(
    merged: &MergedConfig,
    ctx: &OutputContext,
) -> Result<OnlineSession> {
    ctx.info(&format!(
        "Connecting to {}:{}...",
        merged.mqtt.host, merged.mqtt.port
    ));
    debug!(
        host = %merged.mqtt.host,
        port = merged.mqtt.port,
        auth = merged.mqtt.username.is_some(),
        "Connecting to broker"
    );
    let client = pubsub::connect(&merged.mqtt)?;
    let session = OnlineSession::new(client);

    match session.wait_connected(merged.mqtt.connect_timeout()).await {
        ConnectOutcome::Connected => Ok(session),
        ConnectOutcome::Failed(reason) => bail!("Broker connection failed: {}", reason),
        ConnectOutcome::Pending => bail!(
            "Broker did not answer within {} ms",
            merged.mqtt.connect_timeout_ms
        ),
    }
}

/// Flag cleared by Ctrl+C.
pub(crate) fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

/// Resolves once `running` is cleared.
pub(crate) async fn interrupted(running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
