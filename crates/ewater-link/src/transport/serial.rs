//! Serial port line transport
//!
//! The port is read on a dedicated blocking thread that splits incoming
//! bytes on `\n` and forwards trimmed lines over a broadcast channel.
//! Writes go straight to a cloned handle of the same port.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use tokio::sync::broadcast;

use super::{LineConnector, LineTransport, LinkEvent, PortInfo, TransportError};

const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest partial line kept while waiting for `\n`
const MAX_PENDING: usize = 4096;

/// List serial ports the OS knows about.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports =
        serialport::available_ports().map_err(|e| TransportError::Enumeration(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let parts: Vec<String> = [usb.manufacturer, usb.product]
                        .into_iter()
                        .flatten()
                        .collect();
                    (!parts.is_empty()).then(|| parts.join(" "))
                }
                _ => None,
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Line transport over a local serial port (8N1, no flow control)
pub struct SerialLineTransport {
    port_name: String,
    writer: Mutex<Box<dyn SerialPort>>,
    open: Arc<AtomicBool>,
    events_tx: broadcast::Sender<LinkEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLineTransport {
    pub fn open(port_name: &str, baud: u32) -> Result<Self, TransportError> {
        let open_err = |e: serialport::Error| TransportError::OpenFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        };

        let port = serialport::new(port_name, baud)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(open_err)?;
        let reader_port = port.try_clone().map_err(open_err)?;

        let (events_tx, _) = broadcast::channel(512);
        let open = Arc::new(AtomicBool::new(true));

        let reader = {
            let events_tx = events_tx.clone();
            let open = open.clone();
            let name = port_name.to_string();
            std::thread::Builder::new()
                .name(format!("serial-reader-{}", name))
                .spawn(move || read_loop(reader_port, events_tx, open, name))
                .map_err(|e| TransportError::OpenFailed {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                })?
        };

        tracing::info!(port = %port_name, baud, "Serial port opened");

        Ok(Self {
            port_name: port_name.to_string(),
            writer: Mutex::new(port),
            open,
            events_tx,
            reader: Mutex::new(Some(reader)),
        })
    }
}

/// Splits a byte stream into trimmed, non-empty lines.
///
/// A partial line longer than [`MAX_PENDING`] is discarded, which happens
/// when the console is read at the wrong baud rate.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.pending.len() > MAX_PENDING {
            tracing::warn!(
                dropped = self.pending.len(),
                "Discarding unterminated serial input"
            );
            self.pending.clear();
        }
        lines
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    events_tx: broadcast::Sender<LinkEvent>,
    open: Arc<AtomicBool>,
    name: String,
) {
    let mut buf = [0u8; 512];
    let mut splitter = LineSplitter::default();

    while open.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    let _ = events_tx.send(LinkEvent::Line(line));
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                tracing::warn!(port = %name, error = %e, "Serial read failed");
                let _ = events_tx.send(LinkEvent::Error(e.to_string()));
                open.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    let _ = events_tx.send(LinkEvent::Closed);
    tracing::debug!(port = %name, "Serial reader stopped");
}

#[async_trait]
impl LineTransport for SerialLineTransport {
    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let mut writer = self.writer.lock();
        writer
            .write_all(format!("{}\n", line).as_bytes())
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // the reader notices the flag within one read timeout
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        tracing::info!(port = %self.port_name, "Serial port closed");
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for SerialLineTransport {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Opens [`SerialLineTransport`]s
#[derive(Debug, Default, Clone)]
pub struct SerialConnector;

#[async_trait]
impl LineConnector for SerialConnector {
    async fn open(&self, port: &str, baud: u32) -> Result<Arc<dyn LineTransport>, TransportError> {
        let port = port.to_string();
        let transport = tokio::task::spawn_blocking(move || SerialLineTransport::open(&port, baud))
            .await
            .map_err(|e| TransportError::Unsupported(e.to_string()))??;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splitter_joins_chunks_and_trims() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"  SSID: Ho").is_empty());
        assert_eq!(
            splitter.push(b"me\r\n\r\nPort: 1883\n"),
            vec!["SSID: Home", "Port: 1883"]
        );
    }

    #[test]
    fn test_splitter_drops_runaway_partial_line() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(&[0x55; MAX_PENDING + 1]).is_empty());
        assert!(splitter.pending.is_empty());

        assert_eq!(splitter.push(b"ok\n"), vec!["ok"]);
    }
}
