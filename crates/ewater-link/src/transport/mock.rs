//! Mock line transport for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::{LineConnector, LineTransport, LinkEvent, TransportError};

/// In-memory line transport
///
/// Records every written line, can fail a chosen write, and can answer
/// commands with canned device output.
pub struct MockLineTransport {
    port: String,
    open: AtomicBool,
    events_tx: broadcast::Sender<LinkEvent>,
    written: Mutex<Vec<String>>,
    writes: AtomicUsize,
    /// 1-based index of the write that should fail
    fail_on: RwLock<Option<usize>>,
    fail_close: AtomicBool,
    /// Command verb -> lines emitted when that command is written
    responses: RwLock<HashMap<String, Vec<String>>>,
}

impl MockLineTransport {
    pub fn new(port: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            port: port.into(),
            open: AtomicBool::new(true),
            events_tx,
            written: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            fail_on: RwLock::new(None),
            fail_close: AtomicBool::new(false),
            responses: RwLock::new(HashMap::new()),
        }
    }

    /// Make the `n`th write attempt (1-based) fail.
    pub fn fail_on_write(&self, n: usize) {
        *self.fail_on.write() = Some(n);
    }

    /// Make `close` report an error (the link still goes down).
    pub fn fail_on_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Emit `lines` whenever a command starting with `verb` is written.
    pub fn respond_to(&self, verb: &str, lines: Vec<String>) {
        self.responses.write().insert(verb.to_string(), lines);
    }

    /// Simulate a line arriving from the device.
    pub fn inject_line(&self, line: &str) {
        let _ = self.events_tx.send(LinkEvent::Line(line.trim().to_string()));
    }

    /// Simulate the device disappearing.
    pub fn unplug(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(LinkEvent::Closed);
    }

    /// Lines successfully written so far.
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Number of write attempts, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LineTransport for MockLineTransport {
    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if *self.fail_on.read() == Some(attempt) {
            return Err(TransportError::WriteFailed("mock write failure".to_string()));
        }

        self.written.lock().push(line.to_string());
        tracing::debug!(port = %self.port, attempt, "Mock transport: line written");

        let verb = line.split(':').next().unwrap_or(line);
        let reply = self.responses.read().get(verb).cloned();
        if let Some(lines) = reply {
            for reply_line in lines {
                let _ = self.events_tx.send(LinkEvent::Line(reply_line));
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events_tx.send(LinkEvent::Closed);
        }
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("mock close failure".to_string()));
        }
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}

/// Connector that hands out fresh mock transports and remembers them
#[derive(Default)]
pub struct MockConnector {
    opened: Mutex<Vec<Arc<MockLineTransport>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transport opened so far, oldest first.
    pub fn opened(&self) -> Vec<Arc<MockLineTransport>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl LineConnector for MockConnector {
    async fn open(&self, port: &str, _baud: u32) -> Result<Arc<dyn LineTransport>, TransportError> {
        let transport = Arc::new(MockLineTransport::new(port));
        self.opened.lock().push(transport.clone());
        Ok(transport)
    }
}
