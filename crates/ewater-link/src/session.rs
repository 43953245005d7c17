//! Serial configuration session
//!
//! Owns the last-known [`DeviceConfigSnapshot`] for one serial connection.
//! A background task feeds every incoming line to the snapshot parser in
//! arrival order. Pushing a draft reconciles it against the snapshot,
//! dispatches the resulting operations and, on success, adopts the
//! snapshot the reconciliation predicted.

use std::sync::Arc;

use ewater_core::{
    reconcile, ApplyMode, Channel, ConfigDraft, DeviceConfigSnapshot, LineCommand,
    ValidationError, Verb,
};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::dispatch::{DispatchError, DispatchSequence};
use crate::transport::{LineTransport, LinkEvent, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of pushing a draft
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// Masked wire text of every operation sent, in order
    pub sent: Vec<String>,
    pub warnings: Vec<String>,
}

impl PushOutcome {
    pub fn nothing_to_send(&self) -> bool {
        self.sent.is_empty()
    }
}

pub struct SerialSession {
    transport: Arc<dyn LineTransport>,
    config: SerialConfig,
    snapshot: Arc<RwLock<DeviceConfigSnapshot>>,
    lines_tx: broadcast::Sender<String>,
    reader: JoinHandle<()>,
}

impl SerialSession {
    /// Start a session on an open transport with an empty snapshot.
    pub fn new(transport: Arc<dyn LineTransport>, config: SerialConfig) -> Self {
        let snapshot = Arc::new(RwLock::new(DeviceConfigSnapshot::new()));
        let (lines_tx, _) = broadcast::channel(256);

        let reader = tokio::spawn(ingest_lines(
            transport.subscribe(),
            snapshot.clone(),
            lines_tx.clone(),
            transport.port_name().to_string(),
        ));

        Self {
            transport,
            config,
            snapshot,
            lines_tx,
            reader,
        }
    }

    /// Start a session and request the configuration report after the
    /// configured initial delay.
    pub async fn open(
        transport: Arc<dyn LineTransport>,
        config: SerialConfig,
    ) -> Result<Self, TransportError> {
        let session = Self::new(transport, config);
        tokio::time::sleep(session.config.initial_read_delay()).await;
        session.request_config().await?;
        Ok(session)
    }

    pub fn transport(&self) -> &Arc<dyn LineTransport> {
        &self.transport
    }

    pub fn snapshot(&self) -> DeviceConfigSnapshot {
        self.snapshot.read().clone()
    }

    /// Every device line, for monitors. Lines are delivered after the
    /// snapshot has seen them.
    pub fn lines(&self) -> broadcast::Receiver<String> {
        self.lines_tx.subscribe()
    }

    /// Ask the device to print its configuration.
    pub async fn request_config(&self) -> Result<(), TransportError> {
        debug!(port = %self.transport.port_name(), "Requesting configuration report");
        self.transport
            .write_line(&LineCommand::new(Verb::GetConfig).to_line())
            .await
    }

    /// Request the report, wait for it to settle and return the snapshot.
    pub async fn read_config(&self) -> Result<DeviceConfigSnapshot, TransportError> {
        self.request_config().await?;
        tokio::time::sleep(self.config.report_settle()).await;
        Ok(self.snapshot())
    }

    /// Send a raw console line (e.g. `RESTART`).
    pub async fn send_raw(&self, line: &str) -> Result<(), TransportError> {
        self.transport.write_line(line).await
    }

    /// Reconcile `draft` against the snapshot and send the changes.
    ///
    /// On success the snapshot becomes the predicted post-apply snapshot.
    /// On a dispatch failure the snapshot is marked unread, since the
    /// device now holds an unknown mix of old and new values.
    pub async fn push(
        &self,
        draft: &ConfigDraft,
        apply: Option<ApplyMode>,
    ) -> Result<PushOutcome, SessionError> {
        let current = self.snapshot();
        let plan = reconcile(&current, draft, Channel::Serial)?.to_serial();
        for warning in &plan.warnings {
            warn!(port = %self.transport.port_name(), "{}", warning);
        }

        if plan.commands.is_empty() {
            info!("No configuration changes to send");
            return Ok(PushOutcome {
                sent: Vec::new(),
                warnings: plan.warnings,
            });
        }

        let sequence = DispatchSequence::new(plan.commands.clone(), self.config.dispatch_delay())
            .with_follow_up(apply);
        let mut sent: Vec<String> = plan.commands.iter().map(LineCommand::masked).collect();
        if let Some(mode) = apply {
            sent.push(mode.follow_up().masked());
        }

        match sequence.run(self.transport.as_ref()).await {
            Ok(report) => {
                info!(sent = report.sent, "Configuration pushed");
                *self.snapshot.write() = plan.snapshot;
                Ok(PushOutcome {
                    sent,
                    warnings: plan.warnings,
                })
            }
            Err(e) => {
                self.snapshot.write().invalidate();
                Err(e.into())
            }
        }
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn ingest_lines(
    mut events: broadcast::Receiver<LinkEvent>,
    snapshot: Arc<RwLock<DeviceConfigSnapshot>>,
    lines_tx: broadcast::Sender<String>,
    port: String,
) {
    loop {
        match events.recv().await {
            Ok(LinkEvent::Line(line)) => {
                debug!(port = %port, line = %line, "Device line");
                snapshot.write().apply_report_line(&line);
                let _ = lines_tx.send(line);
            }
            Ok(LinkEvent::Error(e)) => warn!(port = %port, error = %e, "Serial link error"),
            Ok(LinkEvent::Closed) => {
                info!(port = %port, "Serial link closed; discarding snapshot");
                *snapshot.write() = DeviceConfigSnapshot::new();
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(port = %port, skipped = n, "Dropped device lines");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
