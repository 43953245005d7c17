//! Line transports for the controller's serial console
//!
//! - Serial adapter over a local USB/UART port (feature `serial`)
//! - Mock adapter for testing
//! - [`SerialManager`] enforcing one live connection per process

mod adapter;
pub mod error;
pub mod manager;
pub mod mock;

#[cfg(feature = "serial")]
pub mod serial;

pub use adapter::{LineConnector, LineTransport, LinkEvent, PortInfo, PortRelease};
pub use error::TransportError;
pub use manager::SerialManager;

use std::sync::Arc;

/// Connector for real serial ports.
pub fn default_connector() -> Result<Arc<dyn LineConnector>, TransportError> {
    #[cfg(feature = "serial")]
    {
        Ok(Arc::new(serial::SerialConnector))
    }
    #[cfg(not(feature = "serial"))]
    {
        Err(TransportError::Unsupported(
            "serial ports require the 'serial' feature".to_string(),
        ))
    }
}

/// List available serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    #[cfg(feature = "serial")]
    {
        serial::list_ports()
    }
    #[cfg(not(feature = "serial"))]
    {
        Err(TransportError::Unsupported(
            "serial ports require the 'serial' feature".to_string(),
        ))
    }
}
