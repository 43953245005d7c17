//! Line transport trait and types

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::TransportError;

/// Event delivered by a line transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One trimmed, newline-delimited line from the device
    Line(String),
    /// Read-side failure; the link may still be usable
    Error(String),
    /// The link closed (device unplugged or explicit close)
    Closed,
}

/// Description of a serial port available for connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// USB manufacturer/product, when the OS reports one
    pub description: Option<String>,
}

/// Newline-delimited text link to a controller
///
/// Abstracts the serial library so sessions and the dispatch sequencer can
/// be driven by the in-memory mock in tests.
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Write one line; the trailing newline is added by the transport.
    async fn write_line(&self, line: &str) -> Result<(), TransportError>;

    /// Subscribe to incoming lines and link events.
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;

    fn is_open(&self) -> bool;

    /// Close the link. Closing an already closed link is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Name of the underlying port (e.g. `/dev/ttyUSB0`)
    fn port_name(&self) -> &str;
}

/// Opens line transports by port name
#[async_trait]
pub trait LineConnector: Send + Sync {
    async fn open(
        &self,
        port: &str,
        baud: u32,
    ) -> Result<std::sync::Arc<dyn LineTransport>, TransportError>;
}

/// Something that can give up a serial port so another process may use it.
///
/// The flash orchestrator calls this before launching the flashing tool,
/// which needs exclusive access to the port.
#[async_trait]
pub trait PortRelease: Send + Sync {
    /// Close any connection held on `port`. Returns true when one was closed.
    async fn release(&self, port: &str) -> bool;
}
